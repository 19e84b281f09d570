use std::env;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use node::config::OverlayConfig;
use node::Node;

/// Main entry point to start one node of the query overlay.
///
/// Every node runs this same binary; the node identity comes from the
/// `NODE_ID` environment variable and everything else from the shared
/// config file.
///
/// # Usage
///
/// ```sh
/// NODE_ID=B cargo run -- overlay.json [crashes.csv]
/// ```
///
/// The process serves until standard input reaches EOF, then shuts down
/// cleanly.
///
/// # Return Values
///
/// - `Ok(())` - The node served and shut down cleanly (exit 0).
/// - `Err(String)` - Bad arguments, config failure, or the server could
///   not start (exit 1).
fn main() -> Result<(), String> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args.len() > 3 {
        return Err("Usage: NODE_ID=<id> node_launcher <config.json> [data.csv]".to_string());
    }

    let node_id = env::var("NODE_ID")
        .map_err(|_| "NODE_ID environment variable is not set".to_string())?;

    let config = OverlayConfig::load(Path::new(&args[1])).map_err(|e| e.to_string())?;

    let csv_path = args.get(2).map(PathBuf::from);

    let work_dir =
        env::current_dir().map_err(|_| "Failed to determine the current directory".to_string())?;

    let node = Node::new(&node_id, config, csv_path.as_deref(), &work_dir)
        .map_err(|e| e.to_string())?;

    if csv_path.is_none() {
        node.seed_demo().map_err(|e| e.to_string())?;
    }

    node.start().map_err(|e| e.to_string())?;

    // Serve until stdin closes; an orchestrator ends the node by closing
    // its input.
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        if line.is_err() {
            break;
        }
    }

    node.stop();
    Ok(())
}
