//! Background work for the value queue: the refill worker pool.

pub(crate) mod refiller;
