#![forbid(unsafe_code)]

// avoids headscratching
#![deny(unused_must_use)]

// for the time being silence the lint. need to figure if we actually
// want to work with Send (not needed for embassy)
#![allow(async_fn_in_trait)]

pub mod sshwire;
pub mod config;
pub mod error;
pub mod proto;
pub mod sftpnames;

mod attrs;
mod flags;
mod framer;
mod requests;
mod extensions;

mod client;
mod server;

mod sftpclient;
mod sftpserver;

mod endpoint;
#[cfg(unix)]
mod localfs;
mod xfer;

mod sftplog;

// Application API
pub use sshwire::TextString;

pub use attrs::{Attrs, AttrsFlags, ExtendedAttr};
pub use client::DirEntry;
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use extensions::Extensions;
pub use flags::OpenFlags;
pub use proto::{StatVfs, StatusCode};

pub use sftpclient::{FileOptions, OwnedHandle, RemoteFile, SftpClient};
pub use sftpserver::{serve, SftpOpResult, SftpServer};

pub use endpoint::Endpoint;
#[cfg(unix)]
pub use localfs::LocalFs;
pub use xfer::{transfer, StepFn, TransferOptions};
