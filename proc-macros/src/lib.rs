use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, Type};

/// Define a save state struct plus conversions to and from it.
///
/// The save state struct will have the name `{struct_name}State`. The original struct gains two
/// methods:
/// - `to_state(&self)` which returns a save state value
/// - `from_state(state)` which rebuilds the original struct from a save state value
///
/// Fields that are not annotated with `#[save_state(skip)]` must implement `Clone`.
///
/// A field annotated with `#[save_state(skip)]` is left out of the save state struct, and
/// `from_state()` recreates it with `Default::default()`. The field type must implement `Default`.
/// This is meant for state that can be fully reconstructed, like decode caches.
///
/// The save state struct will implement the traits `Debug`, `Clone`, `bincode::Encode`, and
/// `bincode::Decode`.
///
/// Example usage:
/// ```
/// use bincode::{Decode, Encode};
/// use proc_macros::SaveState;
///
/// #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
/// struct Envelope {
///     level: i32,
/// }
///
/// #[derive(SaveState)]
/// struct Voice {
///     envelope: Envelope,
///     pitch: u16,
///     #[save_state(skip)]
///     decoded_blocks: Vec<i16>,
/// }
///
/// let voice = Voice {
///     envelope: Envelope { level: 5 },
///     pitch: 0x1000,
///     decoded_blocks: vec![1, 2, 3],
/// };
/// let state = voice.to_state();
///
/// assert_eq!(state.envelope, Envelope { level: 5 });
/// assert_eq!(state.pitch, 0x1000);
///
/// let restored = Voice::from_state(state);
/// assert_eq!(restored.pitch, 0x1000);
/// assert!(restored.decoded_blocks.is_empty());
/// ```
///
/// # Panics
///
/// This macro only supports structs with named fields, and it will panic if applied to a different
/// data type.
#[proc_macro_derive(SaveState, attributes(save_state))]
pub fn save_state(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input: DeriveInput = syn::parse(input).expect("Failed to parse input");

    let struct_ident = &input.ident;
    let vis = &input.vis;

    let Data::Struct(struct_data) = &input.data else {
        panic!("SaveState macro only supports structs; '{struct_ident}' is not a struct");
    };

    let Fields::Named(fields) = &struct_data.fields else {
        panic!(
            "SaveState macro only supports structs with named fields; '{struct_ident}' does not have named fields"
        );
    };

    let save_state_ident = format_ident!("{struct_ident}State");

    let mut save_state_fields = Vec::new();
    let mut to_state_fields = Vec::new();
    let mut from_state_fields = Vec::new();

    for field in &fields.named {
        let field_ident = field.ident.as_ref().unwrap();
        let field_ty = &field.ty;
        let conversion = if field.attrs.iter().any(is_skipped) {
            FieldConversion::skip(field_ident)
        } else {
            FieldConversion::cloned(field_ident, field_ty)
        };

        if let Some(save_state_field) = conversion.save_state_field {
            save_state_fields.push(save_state_field);
        }
        if let Some(to_state_field) = conversion.to_state_field {
            to_state_fields.push(to_state_field);
        }
        from_state_fields.push(conversion.from_state_field);
    }

    let struct_definition = quote! {
        #[derive(Debug, Clone, ::bincode::Encode, ::bincode::Decode)]
        #vis struct #save_state_ident {
            #(#save_state_fields,)*
        }
    };

    let conversion_impl = quote! {
        impl #struct_ident {
            #[must_use]
            pub fn to_state(&self) -> #save_state_ident {
                #save_state_ident {
                    #(#to_state_fields,)*
                }
            }

            #[must_use]
            pub fn from_state(state: #save_state_ident) -> Self {
                Self {
                    #(#from_state_fields,)*
                }
            }
        }
    };

    let gen = quote! {
        #struct_definition
        #conversion_impl
    };

    gen.into()
}

struct FieldConversion {
    save_state_field: Option<TokenStream>,
    to_state_field: Option<TokenStream>,
    from_state_field: TokenStream,
}

impl FieldConversion {
    fn skip(field_ident: &Ident) -> Self {
        Self {
            save_state_field: None,
            to_state_field: None,
            from_state_field: quote! {
                #field_ident: ::core::default::Default::default()
            },
        }
    }

    fn cloned(field_ident: &Ident, field_ty: &Type) -> Self {
        Self {
            save_state_field: Some(quote! {
                #field_ident: #field_ty
            }),
            to_state_field: Some(quote! {
                #field_ident: self.#field_ident.clone()
            }),
            from_state_field: quote! {
                #field_ident: state.#field_ident
            },
        }
    }
}

fn is_skipped(attribute: &Attribute) -> bool {
    if !attribute.path().is_ident("save_state") {
        return false;
    }

    let mut skip = false;
    attribute
        .parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                return Ok(());
            }

            Err(meta.error("Unexpected save_state attribute"))
        })
        .expect("Failed to parse save_state attribute");

    skip
}
