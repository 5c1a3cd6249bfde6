pub mod catalogue_cmd;
pub mod imports_cmd;
pub mod init_cmd;
pub mod run_cmd;
