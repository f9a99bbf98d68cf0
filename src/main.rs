use std::time::Duration;

use benor_sim::{FaultAssignment, FaultKind, Network, SimConfig, Value};
use tracing_subscriber::EnvFilter;

/*
    Demo run: ten nodes, two of them byzantine, mixed initial values.
    Within the tolerance bound (10 > 2 * 2) the eight honest nodes are
    expected to converge; the outcome and every node's final snapshot
    are printed at the end.
*/

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = SimConfig::new(10, 2)?
        .with_seed(42)
        .with_round_ceiling(1000)
        .with_phase_timeout(Duration::from_millis(50));
    let assignment = FaultAssignment::classify(config.n, config.f, FaultKind::Byzantine);
    let initial_values: Vec<Value> = (0..config.n).map(|id| Value::from_bit(id % 2 == 0)).collect();

    let mut network = Network::new(config.clone(), assignment, initial_values)?;
    network.wait_ready().await;
    network.start_all()?;

    let outcome = network.wait_for_outcome(Duration::from_millis(10)).await;
    println!("outcome: {outcome:?}");

    for id in 0..config.n {
        let state = network.state(id)?;
        println!(
            "node {id}: value={:?} decided={:?} round={:?}",
            state.value, state.decided, state.round
        );
    }

    network.stop_all();
    Ok(())
}
