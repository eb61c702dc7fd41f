//! Discover Command

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use playdeck_common::discovery::group_by_folder;
use playdeck_common::{DiscoveredTest, TestDiscovery, DEFAULT_TEST_SUFFIX};
use serde::Serialize;

use crate::output::{print_json, print_list, render_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct DiscoverArgs {
    /// Tests root to scan
    pub root: PathBuf,

    /// Only scan this top-level folder
    #[arg(long)]
    pub folder: Option<String>,

    /// File suffix identifying test files
    #[arg(long, default_value = DEFAULT_TEST_SUFFIX)]
    pub suffix: String,

    /// Group tests by top-level folder
    #[arg(long)]
    pub grouped: bool,
}

#[derive(Serialize)]
pub struct TestDisplay {
    pub folder: String,
    pub file: String,
    pub name: String,
}

impl From<DiscoveredTest> for TestDisplay {
    fn from(test: DiscoveredTest) -> Self {
        Self {
            folder: test.folder_path,
            file: test.test_file,
            name: test.test_name,
        }
    }
}

impl TableDisplay for TestDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Folder", "File", "Test"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.folder.clone(), self.file.clone(), self.name.clone()]
    }
}

pub fn execute(args: DiscoverArgs, format: OutputFormat) -> Result<()> {
    if !args.root.is_dir() {
        bail!("{} is not a directory", args.root.display());
    }

    let discovery = TestDiscovery::new(&args.suffix);
    let tests = discovery.discover(&args.root, args.folder.as_deref());

    if !args.grouped {
        let displays: Vec<TestDisplay> = tests.into_iter().map(TestDisplay::from).collect();
        print_list(&displays, format);
        return Ok(());
    }

    let categories = group_by_folder(tests);
    match format {
        OutputFormat::Json => print_json(&categories),
        OutputFormat::Table => {
            if categories.is_empty() {
                println!("No items found.");
            }
            for category in categories {
                println!("{} ({} tests)", category.display_name, category.tests.len());
                let displays: Vec<TestDisplay> =
                    category.tests.into_iter().map(TestDisplay::from).collect();
                println!("{}", render_list(&displays));
            }
        }
    }
    Ok(())
}
