//! CVRS stress test runner.
//!
//! Command-line entry point for batting the record store around:
//! concurrent replicas, faulty networks, convergence checks.

use cvrs_sync::NetworkConfig;
use stress_test::{stress_concurrent_replicas, stress_sync_cluster};


fn main() {
    tracing_subscriber::fmt::init();

    let rt = tokio::runtime::Runtime::new().unwrap();
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("quick") | None => rt.block_on(run_quick()),
        Some("core") => rt.block_on(run_core()),
        Some("sync") => run_sync(),
        Some("full") => rt.block_on(run_full()),
        Some("help") | Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            println!("Unknown test suite: {other}");
            print_usage();
        }
    }
}

fn print_usage() {
    println!("CVRS stress test suite");
    println!();
    println!("Usage: cargo run [test_suite]");
    println!();
    println!("Available test suites:");
    println!("  quick    - Quick smoke tests (default)");
    println!("  core     - Concurrent replica stress tests");
    println!("  sync     - Sync cluster tests over faulty networks");
    println!("  full     - Everything (takes longer)");
    println!("  help     - Show this help message");
    println!();
}

async fn run_quick() {
    println!("── Quick smoke tests ───────────────────────────────────────");

    let stats = stress_concurrent_replicas(3, 50).await;
    stats.print();

    let stats = stress_sync_cluster(3, 30, NetworkConfig::default(), "perfect");
    stats.print();

    println!("\n✓ Quick tests completed");
}

async fn run_core() {
    println!("── Concurrent replica stress ───────────────────────────────");

    let stats = stress_concurrent_replicas(4, 200).await;
    stats.print();

    let stats = stress_concurrent_replicas(8, 500).await;
    stats.print();

    println!("\n✓ Core stress tests completed");
}

fn run_sync() {
    println!("── Sync cluster over faulty networks ───────────────────────");

    let stats = stress_sync_cluster(4, 100, NetworkConfig::default(), "perfect");
    stats.print();

    let stats = stress_sync_cluster(4, 100, NetworkConfig::lossy(0.3), "lossy 30%");
    stats.print();

    let stats = stress_sync_cluster(4, 100, NetworkConfig::with_dups(0.5), "dups 50%");
    stats.print();

    let stats = stress_sync_cluster(5, 100, NetworkConfig::chaotic(), "chaotic");
    stats.print();

    println!("\n✓ Sync tests completed");
}

async fn run_full() {
    run_core().await;
    run_sync();

    println!();
    println!("All runs verify the same invariants:");
    println!("  • Idempotence: re-merging a change set changes nothing");
    println!("  • Commutativity: delivery order does not matter");
    println!("  • Convergence: all replicas reach identical state");
    println!();
    println!("✓ Full suite completed");
}
