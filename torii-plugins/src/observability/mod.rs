pub mod http_log;
