fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let scenario = pmindz_sim::Scenario::from_env().map_err(|e| {
        log::error!("Error reading scenario from environment {e:}");
        e
    })?;
    log::info!("Running {scenario:?}");

    let summary = pmindz_sim::run(&scenario);

    for (n, report) in summary.episodes.iter().enumerate() {
        log::info!(
            "episode {n}: {:?} boot={} reads={} awake={}ms sleep={}s",
            report.outcome,
            report.boot_count,
            report.sensor_read_count,
            report.awake_us / 1000,
            report.sleep_us / 1_000_000
        );
    }
    for value in &summary.gateway {
        log::info!("gateway {:?} = {:.2}", value.quantity, value.value);
    }
    log::info!(
        "{} indicator commands over {}s virtual time",
        summary.indicator_commands,
        summary.virtual_secs
    );

    if scenario.json {
        let json = serde_json::to_string_pretty(&summary).map_err(|e| {
            log::error!("Error serializing summary {e:}");
            pmindz_sim::SimError::from(e)
        })?;
        println!("{json}");
    }

    Ok(())
}
