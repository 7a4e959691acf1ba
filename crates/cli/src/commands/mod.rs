pub mod serve;
pub mod template;
pub mod validate;
