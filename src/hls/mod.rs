pub mod location;
pub mod playlist;
pub mod writer;

pub use playlist::{EncryptionMethod, Playlist, PlaylistEntry, ProgramDateTimeMode};
