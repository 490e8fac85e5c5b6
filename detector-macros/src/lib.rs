use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, punctuated::Punctuated, Expr, ExprLit, ItemFn, Lit, Meta, Token,
};

/// Procedural macro to declare a Test Object Type detector.
///
/// Usage:
/// ```ignore
/// #[detector(id = "gml-feature-collection", label = "GML Feature Collection",
///            parent = "xml-document", priority = 20)]
/// fn matches_gml(resource: &DetectionResource) -> bool {
///     // implementation
/// }
/// ```
///
/// This generates a unit struct implementing the `TypeDetector` trait.
/// `parent`, `priority` and `normalize` (name of a `fn(&mut TestObject)`) are optional.
#[proc_macro_attribute]
pub fn detector(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args with Punctuated::<Meta, Token![,]>::parse_terminated);
    let input_fn = parse_macro_input!(input as ItemFn);

    let mut type_id: Option<String> = None;
    let mut label: Option<String> = None;
    let mut parent: Option<String> = None;
    let mut priority: u32 = 0;
    let mut normalize: Option<String> = None;

    for meta in args {
        if let Meta::NameValue(nv) = meta {
            match nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(lit_str),
                    ..
                }) => {
                    if nv.path.is_ident("id") {
                        type_id = Some(lit_str.value());
                    } else if nv.path.is_ident("label") {
                        label = Some(lit_str.value());
                    } else if nv.path.is_ident("parent") {
                        parent = Some(lit_str.value());
                    } else if nv.path.is_ident("normalize") {
                        normalize = Some(lit_str.value());
                    }
                }
                Expr::Lit(ExprLit {
                    lit: Lit::Int(lit_int),
                    ..
                }) => {
                    if nv.path.is_ident("priority") {
                        priority = lit_int.base10_parse().unwrap_or(0);
                    }
                }
                _ => {}
            }
        }
    }

    let type_id = type_id.expect("detector macro requires 'id' attribute");
    let label = label.unwrap_or_else(|| type_id.clone());

    // "gml-feature-collection" -> "GmlFeatureCollectionDetector"
    let struct_name = derive_struct_name(&type_id);
    let fn_name = &input_fn.sig.ident;

    let parent_tokens = match parent {
        Some(p) => quote! { Some(#p) },
        None => quote! { None },
    };

    let normalize_tokens = match normalize {
        Some(name) => {
            let normalize_fn = format_ident!("{}", name);
            quote! {
                fn normalize(&self, object: &mut crate::models::TestObject) {
                    #normalize_fn(object)
                }
            }
        }
        None => quote! {},
    };

    let expanded = quote! {
        pub struct #struct_name;

        impl crate::detection::core::TypeDetector for #struct_name {
            fn type_id(&self) -> &str {
                #type_id
            }

            fn label(&self) -> &str {
                #label
            }

            fn parent(&self) -> Option<&str> {
                #parent_tokens
            }

            fn priority(&self) -> u32 {
                #priority
            }

            fn matches(&self, resource: &crate::detection::core::DetectionResource) -> bool {
                #fn_name(resource)
            }

            #normalize_tokens
        }

        #input_fn
    };

    TokenStream::from(expanded)
}

/// Derive a struct name from a type id.
///
/// Examples:
/// - "xml-document" -> "XmlDocumentDetector"
/// - "ows-service" -> "OwsServiceDetector"
fn derive_struct_name(type_id: &str) -> proc_macro2::Ident {
    let name = type_id
        .split(|c| c == '-' || c == '.' || c == '_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first_char) => {
                    let mut capitalized = first_char.to_uppercase().to_string();
                    capitalized.push_str(chars.as_str());
                    capitalized
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("");

    format_ident!("{}Detector", name)
}
