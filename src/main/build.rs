use std::io::Result;
fn main() -> Result<()> {
    let mut config = prost_build::Config::new();
    // label maps keep a stable order on the wire and in snapshot files
    let _ = config.btree_map(["."]);
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_with_config(
            config,
            &["src/general/network/proto_src/metric.proto"],
            &["src/"],
        )?;
    Ok(())
}
