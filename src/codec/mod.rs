// Wire codecs
// Stream parsers for the two device protocols; each owns its parse buffer

pub mod teltonika;
pub mod tfms90;

pub use teltonika::{TeltonikaCodec, TeltonikaEvent};
pub use tfms90::{Tfms90Codec, Tfms90Event};
