//! Producer/consumer batching of crypter operations.
//!
//! Both batchers share the same shape: a bounded queue, an atomic closed
//! flag, and a drain lock that owns the queue's receiving half. There is no
//! background task; drains run on whichever producer observed a full queue,
//! or on the one-shot completion handle. When completion returns, no work
//! remains anywhere.

pub mod decrypt;
pub mod encrypt;
