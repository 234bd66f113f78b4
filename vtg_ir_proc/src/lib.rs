/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Derives for the op structs of the vtg IR
//!
//! Op structs hold their sources and destinations either as one field or as
//! one `Vec`.  The slice derives find that field by type and expose it as a
//! slice, and the enum derives forward to the variant's op.

extern crate proc_macro;
extern crate proc_macro2;
#[macro_use]
extern crate quote;
extern crate syn;

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use syn::*;

enum Operands {
    One(Ident),
    List(Ident),
}

fn last_segment<'a>(ty: &'a Type) -> Option<&'a PathSegment> {
    match ty {
        Type::Path(p) if p.qself.is_none() => p.path.segments.last(),
        _ => None,
    }
}

fn is_vec_of(seg: &PathSegment, elem: &str) -> bool {
    if seg.ident != "Vec" {
        return false;
    }
    let PathArguments::AngleBracketed(args) = &seg.arguments else {
        return false;
    };
    matches!(
        args.args.first(),
        Some(GenericArgument::Type(ty))
            if last_segment(ty).is_some_and(|s| s.ident == elem)
    )
}

fn find_operands(fields: &Fields, elem: &str) -> Option<Operands> {
    let Fields::Named(named) = fields else {
        panic!("Op structs must have named fields");
    };

    let mut found = None;
    for f in &named.named {
        let Some(seg) = last_segment(&f.ty) else {
            continue;
        };
        let name = f.ident.clone().unwrap();
        let operands = if seg.ident == elem {
            Operands::One(name)
        } else if is_vec_of(seg, elem) {
            Operands::List(name)
        } else {
            continue;
        };
        assert!(
            found.is_none(),
            "Op structs hold their {} operands in a single field",
            elem
        );
        found = Some(operands);
    }
    found
}

fn derive_as_slice(
    input: TokenStream,
    trait_name: &str,
    func_prefix: &str,
    elem: &str,
) -> TokenStream {
    let DeriveInput { ident, data, .. } = parse_macro_input!(input);

    let trait_name = Ident::new(trait_name, Span::call_site());
    let elem_type = Ident::new(elem, Span::call_site());
    let as_slice =
        Ident::new(&format!("{}_as_slice", func_prefix), Span::call_site());
    let as_mut_slice =
        Ident::new(&format!("{}_as_mut_slice", func_prefix), Span::call_site());

    let (get, get_mut) = match data {
        Data::Struct(s) => match find_operands(&s.fields, elem) {
            Some(Operands::One(field)) => (
                quote! { std::slice::from_ref(&self.#field) },
                quote! { std::slice::from_mut(&mut self.#field) },
            ),
            Some(Operands::List(field)) => (
                quote! { &self.#field[..] },
                quote! { &mut self.#field[..] },
            ),
            None => (quote! { &[] }, quote! { &mut [] }),
        },
        Data::Enum(e) => {
            let mut cases = TokenStream2::new();
            let mut mut_cases = TokenStream2::new();
            for (case, _) in tuple_variants(&e) {
                cases.extend(quote! { #ident::#case(op) => op.#as_slice(), });
                mut_cases.extend(quote! {
                    #ident::#case(op) => op.#as_mut_slice(),
                });
            }
            (
                quote! { match self { #cases } },
                quote! { match self { #mut_cases } },
            )
        }
        Data::Union(_) => panic!("Unions have no operands"),
    };

    quote! {
        impl #trait_name for #ident {
            fn #as_slice(&self) -> &[#elem_type] {
                #get
            }

            fn #as_mut_slice(&mut self) -> &mut [#elem_type] {
                #get_mut
            }
        }
    }
    .into()
}

#[proc_macro_derive(SrcsAsSlice)]
pub fn derive_srcs_as_slice(input: TokenStream) -> TokenStream {
    derive_as_slice(input, "SrcsAsSlice", "srcs", "Src")
}

#[proc_macro_derive(DstsAsSlice)]
pub fn derive_dsts_as_slice(input: TokenStream) -> TokenStream {
    derive_as_slice(input, "DstsAsSlice", "dsts", "Dst")
}

fn tuple_variants(e: &DataEnum) -> Vec<(&Ident, &Type)> {
    e.variants
        .iter()
        .map(|v| {
            let Fields::Unnamed(fields) = &v.fields else {
                panic!("Variant {} must wrap an op", v.ident);
            };
            assert!(
                fields.unnamed.len() == 1,
                "Variant {} must wrap exactly one op",
                v.ident
            );
            (&v.ident, &fields.unnamed[0].ty)
        })
        .collect()
}

/// Forwards `Display` to the wrapped op of each variant
#[proc_macro_derive(Display)]
pub fn derive_display(input: TokenStream) -> TokenStream {
    let DeriveInput { ident, data, .. } = parse_macro_input!(input);
    let Data::Enum(e) = data else {
        panic!("Display can only be derived for op enums");
    };

    let mut cases = TokenStream2::new();
    for (case, _) in tuple_variants(&e) {
        cases.extend(quote! { #ident::#case(op) => op.fmt(f), });
    }
    quote! {
        impl fmt::Display for #ident {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    #cases
                }
            }
        }
    }
    .into()
}

/// Implements `From<Inner>` for every variant of an op enum
#[proc_macro_derive(FromVariants)]
pub fn derive_from_variants(input: TokenStream) -> TokenStream {
    let DeriveInput { ident, data, .. } = parse_macro_input!(input);
    let Data::Enum(e) = data else {
        panic!("FromVariants can only be derived for op enums");
    };

    let mut impls = TokenStream2::new();
    for (case, inner) in tuple_variants(&e) {
        impls.extend(quote! {
            impl From<#inner> for #ident {
                fn from(op: #inner) -> #ident {
                    #ident::#case(op)
                }
            }
        });
    }
    impls.into()
}
