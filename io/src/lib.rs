pub mod acceptor;
pub mod reactor;

pub use acceptor::{Acceptor, IoStream};
pub use reactor::{Handle, Reactor};
