//! Reconstruct trips for a small synthetic fleet and estimate airport revenue.
//!
//! Run with: cargo run --example airport_revenue --features parallel

use cab_trips::{
    CalibrationStats, FareConfig, Pipeline, PipelineConfig, ReferencePoint, RevenueSummary,
};
use std::time::Instant;

/// One vehicle's day: a downtown trip, then a run down to SFO.
fn vehicle_records(vehicle: &str, offset: i64) -> Vec<String> {
    let t = |secs: i64| 1_267_400_000 + offset + secs;
    vec![
        // Cruising vacant
        format!("{vehicle},{},37.7900,-122.4100,E,{},37.7880,-122.4080,E", t(0), t(60)),
        // Downtown pickup
        format!("{vehicle},{},37.7880,-122.4080,E,{},37.7860,-122.4060,M", t(60), t(120)),
        format!("{vehicle},{},37.7860,-122.4060,M,{},37.7800,-122.4000,M", t(120), t(180)),
        format!("{vehicle},{},37.7800,-122.4000,M,{},37.7750,-122.3950,E", t(180), t(240)),
        // Airport run: meter on at the hotel, off at the terminal
        format!("{vehicle},{},37.7750,-122.3950,E,{},37.7700,-122.3940,M", t(900), t(960)),
        format!("{vehicle},{},37.7700,-122.3940,M,{},37.7000,-122.3900,M", t(960), t(1260)),
        format!("{vehicle},{},37.7000,-122.3900,M,{},37.6300,-122.3850,M", t(1260), t(1560)),
        format!("{vehicle},{},37.6300,-122.3850,M,{},37.6180,-122.3810,E", t(1560), t(1680)),
    ]
}

fn main() {
    println!("Airport Revenue Example\n");

    let mut lines = Vec::new();
    for (i, vehicle) in ["101", "102", "abboip", "ojumna"].iter().enumerate() {
        lines.extend(vehicle_records(vehicle, i as i64 * 420));
    }
    // Structural noise the parser must drop
    lines.push("this is not a record".to_string());
    lines.push("101,1267400000,37.79,-122.41,X,1267400060,37.78,-122.40,M".to_string());

    let stats = [CalibrationStats {
        sample_count: 5000,
        latitude_mean: 37.76,
        latitude_variance: 0.0025,
        longitude_mean: -122.42,
        longitude_variance: 0.0016,
    }];

    let config = PipelineConfig {
        summary_output: false,
        fares: FareConfig {
            reference: Some(ReferencePoint::sfo()),
            ..Default::default()
        },
        ..Default::default()
    };

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Configuration rejected: {e}");
            return;
        }
    };

    let start = Instant::now();
    let output = match pipeline.run(lines.iter().map(String::as_str), Some(&stats)) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Run failed: {e}");
            return;
        }
    };
    let elapsed = start.elapsed();

    println!("Trips ({}):", output.trips.len());
    for line in pipeline.render_trips(&output.trips) {
        println!("   {line}");
    }

    println!("\nDistance histogram (non-empty bands):");
    for line in pipeline.render_histogram(&output.histogram) {
        if !line.ends_with("\t0") {
            println!("   {line}");
        }
    }

    println!("\nAirport fares:");
    for line in pipeline.render_fares(&output.fares) {
        println!("   {line}");
    }

    let RevenueSummary { trips, distance, revenue } = output.report.revenue;
    println!("\nSummary:");
    println!("   Lines read:      {}", output.report.lines_read);
    println!("   Malformed:       {}", output.report.malformed);
    println!("   Rejected:        {:?}", output.report.segmentation.rejections);
    println!("   Fares excluded:  {:?}", output.report.fares_excluded);
    println!("   Airport trips:   {trips}");
    println!("   Distance:        {distance:.2} km");
    println!("   Revenue:         ${revenue:.2}");
    println!("   Elapsed:         {elapsed:?}");
}
