pub mod security_info;
pub mod symbols;
