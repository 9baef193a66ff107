//! Network transport.
//!
//! - [`Address`] and [`Family`] describe endpoints; [`resolve`] turns a
//!   host name into candidates.
//! - [`Connection`] is a duplex byte stream with at most one read and
//!   one write in flight.
//! - [`connect`] returns a [`Connecter`] that tries candidates in order.
//! - [`listen`] starts a [`Listener`] that hands every accepted
//!   connection to a callback on a worker.
//!
//! Every constructor takes the runtime [`Handle`](crate::runtime::Handle)
//! whose reactor will multiplex the socket.

mod address;
mod connecter;
mod connection;
mod listener;
mod socket;

pub use address::{Address, Family, resolve};
pub use connecter::{Connecter, connect, connect_one};
pub use connection::{Connection, Read, ReadMode, ReadOutcome, Write, WriteOutcome};
pub use listener::{Listener, listen, listen_on};

pub use crate::utils::Fired;
