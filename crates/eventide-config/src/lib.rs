//! Eventide Config
//!
//! Serializable workflow settings. These are what a JSON config file holds
//! before the engine turns them into its runtime `WorkflowConfig`.
//!
//! Settings can be loaded from:
//! - a JSON file (via CLI with `--config=settings.json`)
//! - `~/.eventide/config.json` when no file is given
//!
//! Every field is optional in the file; missing fields take the defaults
//! listed on [`WorkflowSettings`].

mod settings;

pub use settings::WorkflowSettings;
