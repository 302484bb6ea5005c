use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Type};

/// Derives `crate::conditions::Conditions` for a status struct.
///
/// The struct must carry a field named `conditions` of type
/// `Option<Vec<k8s_openapi::...::Condition>>`; the derive wires the trait's
/// accessors to that field.
#[proc_macro_derive(Conditions)]
pub fn derive_conditions(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let field = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => named
                .named
                .iter()
                .find(|f| f.ident.as_ref().is_some_and(|i| i == "conditions")),
            _ => None,
        },
        _ => None,
    };

    let Some(field) = field else {
        return syn::Error::new_spanned(
            name,
            "#[derive(Conditions)] requires a named `conditions` field",
        )
        .to_compile_error()
        .into();
    };

    // Cheap shape check so a mistyped field fails at derive time with a
    // readable message instead of deep inside the generated impl.
    if !matches!(&field.ty, Type::Path(p) if p.path.segments.last().is_some_and(|s| s.ident == "Option"))
    {
        return syn::Error::new_spanned(
            &field.ty,
            "`conditions` must be an Option<Vec<Condition>>",
        )
        .to_compile_error()
        .into();
    }

    let expanded = quote! {
        impl crate::conditions::Conditions for #name {
            fn conditions(&self) -> &Option<Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>> {
                &self.conditions
            }

            fn conditions_mut(&mut self) -> &mut Option<Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>> {
                &mut self.conditions
            }
        }
    };

    TokenStream::from(expanded)
}
