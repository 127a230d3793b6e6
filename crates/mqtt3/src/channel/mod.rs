//! The framed byte channel between a session and its connection.
//!
//! A session never touches the socket directly: the [`FrameReader`] and
//! [`FrameWriter`] sit between the connection and the packet layer, each
//! pumped by a drainer task. The reader offers read-ahead with
//! peek/commit-tail semantics; the writer buffers whole encoded frames
//! until its drainer pushes them out. The shared [`Deadline`] carries the
//! keepalive expiry both drainers enforce.

pub mod deadline;
pub mod reader;
pub mod writer;

pub use deadline::Deadline;
pub use reader::FrameReader;
pub use writer::FrameWriter;
