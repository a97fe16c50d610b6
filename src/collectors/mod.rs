pub mod collector;
pub mod crypto;
pub mod parser;
pub mod program;
pub mod snmp;
pub mod tcp;
