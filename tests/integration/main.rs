//! Integration tests over the public API.
//!
//! Everything here runs without a browser: the scripts' pure halves
//! (CSV import, dropdown merging, login classification, action lists)
//! are driven the way the session drives them.

mod action_scripts;
mod login_flow;
mod portfolio;
