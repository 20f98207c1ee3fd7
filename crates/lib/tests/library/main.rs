mod build_tests;
mod common;
mod graph_property_tests;
