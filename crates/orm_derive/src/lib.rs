use darling::{FromDeriveInput, FromField, FromVariant};
use proc_macro::{self, TokenStream};
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

#[derive(FromDeriveInput)]
#[darling(attributes(stout), supports(struct_named))]
struct EntityMacroInput {
    ident: syn::Ident,
    generics: syn::Generics,
    data: darling::ast::Data<(), EntityField>,

    #[darling(default)]
    table_name: Option<String>,
    #[darling(default)]
    mapped_superclass: bool,
    #[darling(default)]
    inheritance_single_table: bool,
    #[darling(default)]
    join_tables: Option<syn::Path>,
}

#[derive(FromField)]
#[darling(attributes(stout))]
struct EntityField {
    ident: Option<syn::Ident>,
    ty: syn::Type,

    #[darling(default)]
    primary_key: bool,
    #[darling(default)]
    autoincrement: bool,
    #[darling(default)]
    column: Option<String>,
    #[darling(default)]
    nullable: Option<bool>,
    #[darling(default)]
    insertable: Option<bool>,
    #[darling(default)]
    updatable: Option<bool>,
    #[darling(default)]
    unique: bool,
    #[darling(default)]
    enumerated: Option<syn::LitStr>,
    /// Not mapped at all.
    #[darling(default)]
    transient: bool,
    /// The embedded parent layer.
    #[darling(default)]
    parent: bool,
}

#[derive(FromDeriveInput)]
#[darling(attributes(stout), supports(enum_unit))]
struct EnumMacroInput {
    ident: syn::Ident,
    data: darling::ast::Data<EnumVariant, ()>,
}

#[derive(FromVariant)]
#[darling(attributes(stout))]
struct EnumVariant {
    ident: syn::Ident,
    #[darling(default)]
    rename: Option<String>,
}

/// Build the `FieldMetadata` expression for one mapped field.
fn field_metadata(field: &EntityField, name: &str) -> syn::Result<proc_macro2::TokenStream> {
    let ty = &field.ty;
    let mut out = quote!(::stout_orm::FieldMetadata::new::<#ty>(#name));

    if field.primary_key {
        out = quote!(#out.primary_key());
    }
    if field.autoincrement {
        out = quote!(#out.autoincrement());
    }
    if let Some(column) = &field.column {
        out = quote!(#out.column(#column));
    }
    if let Some(nullable) = field.nullable {
        out = quote!(#out.nullable(#nullable));
    }
    if let Some(insertable) = field.insertable {
        out = quote!(#out.insertable(#insertable));
    }
    if let Some(updatable) = field.updatable {
        out = quote!(#out.updatable(#updatable));
    }
    if field.unique {
        out = quote!(#out.unique());
    }
    if let Some(mode) = &field.enumerated {
        let mode = match mode.value().as_str() {
            "ordinal" => quote!(::stout_orm::EnumMode::Ordinal),
            "string" => quote!(::stout_orm::EnumMode::String),
            _ => {
                return Err(syn::Error::new(
                    mode.span(),
                    "enumerated must be \"ordinal\" or \"string\"",
                ))
            }
        };
        out = quote!(#out.enumerated(#mode));
    }

    Ok(out)
}

#[proc_macro_derive(Entity, attributes(stout))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let derive_input: DeriveInput = parse_macro_input!(input);
    let input = match EntityMacroInput::from_derive_input(&derive_input) {
        Err(e) => return e.write_errors().into(),
        Ok(x) => x,
    };

    match expand_entity(input) {
        Ok(out) => out.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_entity(input: EntityMacroInput) -> syn::Result<proc_macro2::TokenStream> {
    let EntityMacroInput {
        ident,
        generics,
        data,
        table_name,
        mapped_superclass,
        inheritance_single_table,
        join_tables,
    } = input;

    let fields = data
        .take_struct()
        .ok_or_else(|| syn::Error::new(ident.span(), "Entity can only be derived for structs"))?
        .fields;

    let mut metadata = if mapped_superclass {
        quote!(::stout_orm::EntityMetadata::mapped_superclass::<Self>())
    } else {
        quote!(::stout_orm::EntityMetadata::entity::<Self>())
    };
    if let Some(table_name) = table_name {
        metadata = quote!(#metadata.table_name(#table_name));
    }
    if inheritance_single_table {
        metadata = quote!(#metadata.inheritance_single_table());
    }
    if let Some(join_tables) = join_tables {
        metadata = quote!(#metadata.join_tables(#join_tables));
    }

    let mut parent: Option<(syn::Ident, syn::Type)> = None;
    let mut readers = vec![];
    let mut writers = vec![];

    for field in fields.iter() {
        let field_ident = match &field.ident {
            Some(i) => i,
            None => continue,
        };

        if field.parent {
            if parent.is_some() {
                return Err(syn::Error::new(
                    field_ident.span(),
                    "only one field may be marked as the parent",
                ));
            }
            parent = Some((field_ident.clone(), field.ty.clone()));
            continue;
        }
        if field.transient {
            continue;
        }

        let name = field_ident.to_string();
        let field_metadata = field_metadata(field, &name)?;
        metadata = quote!(#metadata.field(#field_metadata));
        readers.push(quote! {
            #name => Some(::stout_orm::PersistentValue::to_field_value(&self.#field_ident)),
        });
        writers.push(quote! {
            #name => {
                self.#field_ident = ::stout_orm::PersistentValue::from_field_value(value)?;
                Ok(())
            }
        });
    }

    let (read_fallback, write_fallback) = match &parent {
        Some((parent_ident, parent_ty)) => {
            metadata = quote!(#metadata.parent::<#parent_ty>());
            (
                quote!(_ => ::stout_orm::Entity::field_value(&self.#parent_ident, field),),
                quote!(_ => ::stout_orm::Entity::set_field_value(&mut self.#parent_ident, field, value),),
            )
        }
        None => (
            quote!(_ => None,),
            quote! {
                _ => Err(::stout_orm::ConversionError::UnknownField {
                    entity: stringify!(#ident),
                    field: field.to_string(),
                }),
            },
        ),
    };

    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::stout_orm::Entity for #ident #ty_generics #where_clause {
            fn metadata() -> ::stout_orm::EntityMetadata {
                #metadata
            }

            fn field_value(&self, field: &str) -> Option<::stout_orm::FieldValue> {
                match field {
                    #(#readers)*
                    #read_fallback
                }
            }

            fn set_field_value(
                &mut self,
                field: &str,
                value: ::stout_orm::FieldValue,
            ) -> std::result::Result<(), ::stout_orm::ConversionError> {
                match field {
                    #(#writers)*
                    #write_fallback
                }
            }
        }
    })
}

#[proc_macro_derive(PersistentEnum, attributes(stout))]
pub fn derive_persistent_enum(input: TokenStream) -> TokenStream {
    let derive_input: DeriveInput = parse_macro_input!(input);
    let input = match EnumMacroInput::from_derive_input(&derive_input) {
        Err(e) => return e.write_errors().into(),
        Ok(x) => x,
    };

    let EnumMacroInput { ident, data } = input;
    let variants = match data.take_enum() {
        Some(v) => v,
        None => {
            return syn::Error::new(ident.span(), "PersistentEnum can only be derived for enums")
                .to_compile_error()
                .into()
        }
    };

    let idents = variants.iter().map(|v| &v.ident).collect::<Vec<_>>();
    let names = variants
        .iter()
        .map(|v| v.rename.clone().unwrap_or_else(|| v.ident.to_string()))
        .collect::<Vec<_>>();

    let out = quote! {
        impl ::stout_orm::PersistentEnum for #ident {
            const TYPE_NAME: &'static str = stringify!(#ident);
            const VARIANTS: &'static [&'static str] = &[#(#names),*];

            fn variant_name(&self) -> &'static str {
                match self {
                    #(Self::#idents => #names,)*
                }
            }

            fn from_variant_name(name: &str) -> Option<Self> {
                match name {
                    #(#names => Some(Self::#idents),)*
                    _ => None,
                }
            }
        }

        impl ::stout_orm::PersistentValue for #ident {
            fn declared_type() -> ::stout_orm::DeclaredType {
                ::stout_orm::DeclaredType::Enum(<Self as ::stout_orm::PersistentEnum>::declaration())
            }

            fn to_field_value(&self) -> ::stout_orm::FieldValue {
                ::stout_orm::FieldValue::Enum(::stout_orm::PersistentEnum::variant_name(self))
            }

            fn from_field_value(
                value: ::stout_orm::FieldValue,
            ) -> std::result::Result<Self, ::stout_orm::ConversionError> {
                ::stout_orm::enum_from_field_value(value)
            }
        }
    };

    out.into()
}
