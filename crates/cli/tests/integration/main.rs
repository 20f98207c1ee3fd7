mod build_tests;
mod check_tests;
mod clean_tests;
mod common;
mod status_tests;
