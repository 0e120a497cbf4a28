//! Reader and writer for 4DS scene files (LS3D engine, version 29).
//!
//! [`decode_file`] turns bytes into a [`SceneGraph`] plus recoverable
//! warnings; [`encode_file`] writes one back. Everything in the graph is in
//! model axes; the codecs convert to and from the file's axis order.

#[macro_use]
extern crate bitflags;
extern crate bytes;
extern crate fds_derive;
#[macro_use]
extern crate typed_ints;

#[macro_use]
pub mod io;
pub mod coords;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod material;
pub mod morph;
pub mod resolve;
pub mod scene;
pub mod sector;
pub mod skeleton;
pub mod skin;
pub mod types;
pub mod visual;

pub use error::{DecodeError, EncodeError, ReferenceKind, Warning};
pub use frame::{Frame, FrameKind, Parent};
pub use scene::{decode_file, encode_file, encode_file_with, Decoded, EncodeOptions, FrameOrder, SceneGraph};
