extern crate proc_macro;
extern crate quote;
extern crate syn;

use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::spanned::Spanned;
use syn::{parse_macro_input, Data, DeriveInput, Fields, GenericArgument, PathArguments, Type};

// #[derive(Readable)] implements io::Readable<T> for a record T by reading every
// field in declaration order. Only named-field structs describe a 4DS record.
#[proc_macro_derive(Readable)]
pub fn sequential_read_fn(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);

    let name = &ast.ident;
    let fields = match named_fields(&ast) {
        Ok(fields) => fields,
        Err(e) => return e.to_compile_error().into(),
    };

    let reads = fields.iter().map(|(ident, ty)| {
        let ftype = type_turbofish(ty);
        quote_spanned! { ty.span() =>
            #ident: #ftype::read(from, ctx)?
        }
    });

    let expanded = quote! {
        impl Readable<#name> for #name {
            fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<#name> {
                Ok(#name {
                    #(#reads, )*
                })
            }
        }
    };

    proc_macro::TokenStream::from(expanded)
}

// #[derive(Writable)] is the mirror image: every field is written in
// declaration order and the first failure is returned.
#[proc_macro_derive(Writable)]
pub fn sequential_write_fn(item: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);

    let name = &ast.ident;
    let fields = match named_fields(&ast) {
        Ok(fields) => fields,
        Err(e) => return e.to_compile_error().into(),
    };

    let writes = fields.iter().map(|(ident, ty)| {
        quote_spanned! { ty.span() =>
            self.#ident.write(to, ctx)?
        }
    });

    let expanded = quote! {
        impl Writable<#name> for #name {
            fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
                #(#writes;)*
                Ok(())
            }
        }
    };

    proc_macro::TokenStream::from(expanded)
}

fn named_fields(ast: &DeriveInput) -> syn::Result<Vec<(&syn::Ident, &Type)>> {
    match &ast.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => Ok(fields
                .named
                .iter()
                .filter_map(|f| f.ident.as_ref().map(|ident| (ident, &f.ty)))
                .collect()),
            Fields::Unnamed(_) | Fields::Unit => Err(syn::Error::new(
                ast.ident.span(),
                "Readable/Writable can only be derived for structs with named fields",
            )),
        },
        Data::Enum(_) | Data::Union(_) => Err(syn::Error::new(
            ast.ident.span(),
            "Readable/Writable can only be derived for structs",
        )),
    }
}

// `Vec<u16>::read` is not valid in expression position, so generic arguments
// get an extra `::` in front of their angle brackets.
fn type_turbofish(t: &Type) -> TokenStream {
    match t {
        Type::Path(typepath) if !typepath.path.segments.is_empty() => {
            let mut segments = typepath
                .path
                .segments
                .iter()
                .map(|segment| {
                    let ident = &segment.ident;
                    match &segment.arguments {
                        PathArguments::AngleBracketed(args) => {
                            let types = args.args.iter().map(|arg| match arg {
                                GenericArgument::Type(ty) => type_turbofish(ty),
                                other => quote! { #other },
                            });
                            quote! { #ident :: < #(#types),* > }
                        }
                        _ => quote! { #ident },
                    }
                })
                .collect::<Vec<_>>();

            let first = segments.remove(0);
            quote! { #first #( :: #segments)* }
        }
        // Arrays, tuples and references go through the qualified form.
        _ => quote! { <#t> },
    }
}
