mod catalog_csv;
mod common;
