use clap::Parser;
use racesim::core::handle_race::RaceSimulation;
use racesim::core::wager::user_path;
use racesim::interfaces::memory_store::InMemoryStore;
use racesim::interfaces::store::DocumentStore;
use racesim::pre::read_sim_pars::{read_sim_pars, SimPars};
use racesim::pre::sim_opts::SimOpts;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // PRE-PROCESSING ------------------------------------------------------------------------------
    // get simulation options from the command line arguments
    let sim_opts: SimOpts = SimOpts::parse();

    let level = if sim_opts.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    // get simulation parameters
    let mut sim_pars = if let Some(parfile_path) = &sim_opts.parfile_path {
        info!("Reading simulation parameters from {:?}", parfile_path);
        read_sim_pars(parfile_path)?
    } else {
        info!("No parameter file given, using the built-in driver grid");
        SimPars::default_race()
    };
    if sim_opts.seed.is_some() {
        sim_pars.race_pars.seed = sim_opts.seed;
    }
    let rng = match sim_pars.race_pars.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // seed the store with the user accounts
    let store = Arc::new(InMemoryStore::new());
    for account in sim_pars.accounts.iter() {
        store
            .write_document(
                &user_path(&account.user_id),
                json!({ "points": account.points }),
                false,
            )
            .await?;
    }

    // EXECUTION -----------------------------------------------------------------------------------
    let (tx, rx) = flume::unbounded();
    let race_store: Arc<dyn DocumentStore> = store.clone();
    let mut sim = RaceSimulation::create(race_store, &sim_pars, rng)
        .await?
        .with_realtime_factor(sim_opts.realtime_factor)
        .with_sender(tx);

    for request in sim_pars.wagers.iter() {
        match sim.place_wager(request).await {
            Ok(wager) => info!(
                "Placed {} wager of {} on {} at {:.2}",
                wager.kind, wager.user_id, wager.target_driver, wager.multiplier
            ),
            Err(err) => warn!("Could not place wager of {}: {}", request.user_id, err),
        }
    }

    // print lap updates as they arrive
    let listener = tokio::spawn(async move {
        while let Ok(race_state) = rx.recv_async().await {
            if let Some(lap) = race_state.lap_completed {
                println!(
                    "INFO: Lap {:3}/{} ({}), leader {}, gap {:.3}s",
                    lap,
                    race_state.status.total_laps,
                    race_state.status.time_elapsed,
                    race_state.latest_lap.leader_name,
                    race_state.latest_lap.gap_to_second
                );
            }
        }
    });

    // stop the race cleanly on Ctrl-C
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping the race after the current tick");
            cancel_on_signal.cancel();
        }
    });

    let t_start = Instant::now();
    let race_result = sim.run(cancel).await?;
    drop(sim);
    listener.await?;
    info!("Execution time: {}ms", t_start.elapsed().as_millis());

    // POST-PROCESSING -----------------------------------------------------------------------------
    race_result.print_standings();

    for account in sim_pars.accounts.iter() {
        let points = store
            .read_document(&user_path(&account.user_id))
            .await?
            .and_then(|doc| doc["points"].as_i64())
            .unwrap_or(0);
        println!(
            "RESULT: User {} has {} points ({:+})",
            account.user_id,
            points,
            points - account.points
        );
    }

    if let Some(output) = &sim_opts.output {
        race_result.write_lap_history_csv(output)?;
        info!("Lap history written to {:?}", output);
    }

    Ok(())
}
