//! Turns a fresh Ubuntu host into a remote development workstation: a
//! code-server IDE behind nginx with HTTPS and basic auth, an XFCE desktop
//! reachable through Guacamole or RDP, or a VS Code tunnel, each installed
//! as an ordered sequence of idempotent steps that can be re-run safely.

pub mod checks;
pub mod config;
pub mod error;
pub mod logging;
pub mod ports;
pub mod render;
pub mod runner;
pub mod steps;
pub mod system;
pub mod ui;
pub mod workflows;
