mod common;

mod abort;
mod commands;
mod persistence;
mod scan;
mod scenarios;
