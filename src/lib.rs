//! # quote-shards
//!
//! Turns a quotation corpus into a static, edge-addressable file tree.
//!
//! An edge rewrite rule picks a quote by taking the first `width`
//! characters of a random hex id and serving the file with that name. No
//! server logic runs at request time, so the generator must guarantee that
//! every possible prefix names an existing file.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐   ┌────────────┐
//! │   Corpus    │──▶│   Planner    │──▶│ Shard writer│──▶│ Manifests  │
//! │ dir/file/URL│   │ width+assign │   │ stage+swap  │   │ rules.txt  │
//! └─────────────┘   └──────────────┘   └─────────────┘   └────────────┘
//! ```
//!
//! ## Output
//!
//! ```text
//! orig_data/{addr}.json          one record per address, all categories
//! categories/{code}/{addr}.json  one record per address, one category
//! rules.txt                      width per space + rendered rewrite rules
//! categories.json                [{code, name, count, width}, …]
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records, category declarations, corpus |
//! | [`corpus`] | Corpus sources (bundle dir, JSON file, HTTP) |
//! | [`index`] | Category index and declaration checks |
//! | [`writer`] | Shard staging and publishing |
//! | [`manifest`] | `rules.txt` and `categories.json` |
//! | [`generate`] | Run orchestration and worker pool |
//! | [`verify`] | Consistency checks over an output tree |
//! | [`progress`] | Progress reporting |
//! | [`error`] | Error taxonomy |

pub mod config;
pub mod corpus;
pub mod error;
pub mod generate;
pub mod index;
pub mod manifest;
pub mod models;
pub mod progress;
pub mod verify;
pub mod writer;
