//! QEMU Monitor Protocol client.
//!
//! Newline-delimited JSON over a Unix-domain stream socket. The server sends
//! a greeting on connect; the client must send `qmp_capabilities` before any
//! other command. Replies are `{"return": ..}` or `{"error": ..}`, and
//! asynchronous `{"event": ..}` notifications may arrive in between.

mod session;
mod transport;

pub use session::QmpSession;
