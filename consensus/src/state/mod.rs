pub mod committee;
pub mod validator;
