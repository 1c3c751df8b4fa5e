pub mod buffer;
pub mod collector;
pub mod feeder;
pub mod format;
pub mod session;

pub use buffer::{DecodeBuffer, FieldParity, PictureBuffer, PixelFormat};
pub use session::{Codec, DecodedPicture, DecoderSession, SessionError};
