//! Derives `SSHEncode` and `SSHDecode` for the SFTP packet structs in
//! `sunset-sftp`'s `proto.rs`.
//!
//! Only structs are supported. Fields are written in declaration order,
//! which is the order they appear on the wire.
//!
//! `SFTPWIRE_DEBUG` environment variable can be set at build time
//! to write generated files to the `target/` directory.

use std::env;

use virtue::generate::FnSelfArg;
use virtue::parse::StructBody;
use virtue::prelude::*;

const ENV_SFTPWIRE_DEBUG: &str = "SFTPWIRE_DEBUG";

const ENC: &str = "crate::sshwire::SSHEncode::enc";
const DEC: &str = "crate::sshwire::SSHDecode::dec";

#[derive(Clone, Copy)]
enum Which {
    Encode,
    Decode,
}

impl Which {
    fn name(self) -> &'static str {
        match self {
            Which::Encode => "SSHEncode",
            Which::Decode => "SSHDecode",
        }
    }
}

#[proc_macro_derive(SSHEncode)]
pub fn derive_encode(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    derive(input, Which::Encode).unwrap_or_else(|e| e.into_token_stream())
}

#[proc_macro_derive(SSHDecode)]
pub fn derive_decode(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    derive(input, Which::Decode).unwrap_or_else(|e| e.into_token_stream())
}

fn derive(input: TokenStream, which: Which) -> Result<TokenStream> {
    let (mut gen, _att, body) = Parse::new(input)?.into_generator();
    let Body::Struct(body) = body else {
        return Err(Error::Custom {
            error: format!("{} can only be derived for structs", which.name()),
            span: None,
        });
    };
    let shape = Shape::of(&body)?;

    match which {
        Which::Encode => encode_struct(&mut gen, &shape)?,
        Which::Decode => decode_struct(&mut gen, &shape)?,
    }

    if env::var(ENV_SFTPWIRE_DEBUG).is_ok() {
        gen.export_to_file("sftpwire", which.name());
    }
    gen.finish()
}

/// Field accessors of a struct, in wire order
enum Shape {
    Named(Vec<String>),
    Tuple(usize),
    Unit,
}

impl Shape {
    fn of(body: &StructBody) -> Result<Self> {
        Ok(match &body.fields {
            Some(Fields::Struct(v)) => {
                Shape::Named(v.iter().map(|(id, _)| id.to_string()).collect())
            }
            Some(Fields::Tuple(v)) => {
                if let Some(f) = v.iter().find(|f| !f.attributes.is_empty()) {
                    return Err(Error::Custom {
                        error: "sftpwire fields take no attributes".into(),
                        span: Some(f.span()),
                    });
                }
                Shape::Tuple(v.len())
            }
            None => Shape::Unit,
        })
    }

    fn accessors(&self) -> Vec<String> {
        match self {
            Shape::Named(names) => names.clone(),
            Shape::Tuple(n) => (0..*n).map(|i| i.to_string()).collect(),
            Shape::Unit => vec![],
        }
    }
}

fn encode_struct(gen: &mut Generator, shape: &Shape) -> Result<()> {
    let stmts: String = shape
        .accessors()
        .iter()
        .map(|a| format!("{ENC}(&self.{a}, s)?;"))
        .collect();

    gen.impl_for("crate::sshwire::SSHEncode")
        .generate_fn("enc")
        .with_generic_deps("E", ["crate::sshwire::SSHSink"])
        .with_self_arg(FnSelfArg::RefSelf)
        .with_arg("s", "&mut E")
        .with_return_type("crate::sshwire::WireResult<()>")
        .body(|b| {
            if !stmts.is_empty() {
                b.push_parsed(stmts.as_str())?;
            }
            b.push_parsed("Ok(())")?;
            Ok(())
        })?;
    Ok(())
}

fn decode_struct(gen: &mut Generator, shape: &Shape) -> Result<()> {
    // Struct literal fields evaluate in source order, so decoding
    // inline keeps wire order.
    let ctor = match shape {
        Shape::Named(names) => {
            let f: String = names.iter().map(|n| format!("{n}: {DEC}(s)?,")).collect();
            format!("Ok(Self {{ {f} }})")
        }
        Shape::Tuple(n) => {
            let f: String = (0..*n).map(|_| format!("{DEC}(s)?,")).collect();
            format!("Ok(Self({f}))")
        }
        Shape::Unit => "Ok(Self {})".into(),
    };

    gen.impl_for_with_lifetimes("crate::sshwire::SSHDecode", ["de"])
        .modify_generic_constraints(|generics, wheres| {
            // borrowed fields must not outlive the input buffer
            for lt in generics.iter_lifetimes() {
                wheres.push_parsed_constraint(format!("'de: '{}", lt.ident))?;
            }
            Ok(())
        })?
        .generate_fn("dec")
        .with_generic_deps("S", ["crate::sshwire::SSHSource<'de>"])
        .with_arg("s", "&mut S")
        .with_return_type("crate::sshwire::WireResult<Self>")
        .body(|b| {
            b.push_parsed(ctor.as_str())?;
            Ok(())
        })?;
    Ok(())
}
