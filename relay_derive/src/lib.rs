#![allow(clippy::all)]
#![deny(unused_variables, clippy::unnecessary_mut_passed, unused_results)]

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Generates the constructor every logical module is built through.
///
/// The deriving type must implement `LogicalModule`; `new` forwards to
/// `inner_new` and `name` reports the module for startup logs.
#[proc_macro_derive(LogicalModule)]
pub fn logical_module_macro_derive(input: TokenStream) -> TokenStream {
    let input: DeriveInput = parse_macro_input!(input);
    let DeriveInput {
        ident, generics, ..
    } = input;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let output = quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            pub fn new(args: LogicalModuleNewArgs) -> Self {
                let ret = <Self as LogicalModule>::inner_new(args);
                tracing::debug!("new logical module {}", Self::name());
                ret
            }

            pub fn name() -> &'static str {
                stringify!(#ident)
            }
        }
    };
    output.into()
}
