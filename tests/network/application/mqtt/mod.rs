mod broker;

pub mod ack;
