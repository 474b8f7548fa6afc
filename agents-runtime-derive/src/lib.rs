//! Attribute macros that prepare plain structs for use with `agents-runtime`.
//!
//! Both macros only add derives; the crate using them must depend on `serde`
//! and `schemars` directly.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Item};

/// Marks a struct or enum as the argument type of a typed function tool.
///
/// Adds `serde::Deserialize` and `schemars::JsonSchema`, which is what
/// `FunctionTool::typed` needs to derive the input schema and decode the
/// validated arguments.
#[proc_macro_attribute]
pub fn tool_args(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as Item);
    with_derives(
        item,
        quote!(#[derive(serde::Deserialize, schemars::JsonSchema)]),
    )
}

/// Marks a struct or enum as an agent's structured output type.
///
/// Adds `serde::Serialize`, `serde::Deserialize` and `schemars::JsonSchema`
/// so the type can be used with `AgentBuilder::output_type` and read back with
/// `RunResult::final_output_as`.
#[proc_macro_attribute]
pub fn output_type(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as Item);
    with_derives(
        item,
        quote!(#[derive(serde::Serialize, serde::Deserialize, schemars::JsonSchema)]),
    )
}

fn with_derives(item: Item, derives: TokenStream2) -> TokenStream {
    match item {
        Item::Struct(_) | Item::Enum(_) => quote! {
            #derives
            #item
        }
        .into(),
        other => syn::Error::new_spanned(other, "expected a struct or an enum")
            .to_compile_error()
            .into(),
    }
}
