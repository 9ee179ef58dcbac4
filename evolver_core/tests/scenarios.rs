//! End-to-end control ticks against the in-memory store.

use evolver_core::config::{LadderSpec, LightSchedule, Spacing};
use evolver_core::light::LightPhase;
use evolver_core::mocks::{FixedGrowth, MemoryLogStore, NoGrowth, RecordingTransport};
use evolver_core::selection::{Decision, SelectionPhase, StepReason};
use evolver_core::{Controller, ControllerConfig, VesselConfig, VesselOutcome};
use evolver_traits::Channel;
use rstest::rstest;

fn vessel(id: usize) -> VesselConfig {
    let mut v = VesselConfig::new(id);
    v.selection.stock_conc = 1000.0;
    v.selection.ladder = LadderSpec::Generated {
        spacing: Spacing::Linear,
        min_level: 25.0,
        max_level: 500.0,
        count: 20,
    };
    v
}

fn controller(vessels: Vec<VesselConfig>) -> Controller {
    Controller::builder()
        .with_config(ControllerConfig {
            vessels,
            ..ControllerConfig::default()
        })
        .with_growth(NoGrowth)
        .build()
        .unwrap()
}

/// Six OD samples ending just before `now`.
fn push_ods(store: &mut MemoryLogStore, v: usize, now: f64, od: f64) {
    for i in (0..6).rev() {
        let t = now - 0.01 * (i as f64 + 1.0);
        store.push(v, Channel::Od, &[t.to_string(), od.to_string()]);
    }
}

fn push_rates(store: &mut MemoryLogStore, v: usize, times: &[f64], rate: f64) {
    for t in times {
        store.push(v, Channel::GrowthRate, &[t.to_string(), rate.to_string()]);
    }
}

fn report(outcome: &VesselOutcome) -> &evolver_core::VesselReport {
    outcome.report().expect("vessel should have run")
}

#[test]
fn scenario_a_high_growth_steps_up() {
    let mut store = MemoryLogStore::new();
    store.push(0, Channel::StepLog, &["1", "1", "25", "25", ""]);
    push_rates(&mut store, 0, &[5.0, 6.0, 7.0, 8.0, 9.0], 0.09);
    push_ods(&mut store, 0, 10.0, 1.8);

    let mut ctl = controller(vec![vessel(0)]);
    let mut transport = RecordingTransport::default();
    let tick = ctl.tick(&mut store, &mut transport, 10.0).unwrap();

    let sel = &report(&tick.outcomes[0]).selection;
    assert_eq!(sel.decision, Decision::Increase(StepReason::HighGrowth));
    assert_eq!(sel.phase, SelectionPhase::Increasing);
    assert_eq!(sel.level, 50.0);
    assert_eq!(sel.concentration, 50.0);
    assert!(sel.status.starts_with("INCREASE: high growth rate | "));
    assert!(sel.status.contains("SELECTION CHEMICAL ADDED 0.658mL | "));

    // 25 * (25 - 50) / (50 - 1000) = 0.658 mL at 1 mL/s
    assert_eq!(tick.fluidic.slot(32), Some(0.66));
    assert_eq!(transport.sent.len(), 1);
    assert_eq!(transport.sent[0].value[32], "0.66");
    assert_eq!(transport.sent[0].value[0], "--");

    let log = store.records(0, Channel::StepLog);
    let last = log.last().unwrap();
    assert_eq!(&last[..4], &["10", "10", "50", "50"]);
    assert_eq!(store.records(0, Channel::DosingLog).len(), 1);
}

#[test]
fn scenario_b_stalled_growth_steps_down_with_rescue() {
    let mut store = MemoryLogStore::new();
    store.push(0, Channel::StepLog, &["1", "1", "50", "50", ""]);
    push_rates(&mut store, 0, &[1.5, 2.0, 2.5, 2.8, 3.0], 0.07);
    push_ods(&mut store, 0, 10.0, 1.8);

    let mut ctl = controller(vec![vessel(0)]);
    let mut transport = RecordingTransport::default();
    let tick = ctl.tick(&mut store, &mut transport, 10.0).unwrap();

    let sel = &report(&tick.outcomes[0]).selection;
    assert_eq!(sel.decision, Decision::Decrease(StepReason::GrowthStalled));
    assert_eq!(sel.level, 25.0);
    assert_eq!(sel.status, "DECREASE: growth stalled | RESCUE DILUTION | ");
    // factor 25 / 50 = 0.5: -ln(0.5) * 25 / 1.0
    assert_eq!(sel.rescue_s, Some(17.33));
    assert_eq!(tick.fluidic.slot(0), Some(17.33));
    assert_eq!(tick.fluidic.slot(16), Some(22.33));
    assert_eq!(store.records(0, Channel::PumpLog).len(), 1);
}

#[test]
fn scenario_b_rescue_budget_spent() {
    let mut store = MemoryLogStore::new();
    store.push(0, Channel::StepLog, &["0", "0", "0", "0", ""]);
    store.push(0, Channel::StepLog, &["0.5", "0.5", "75", "75", "INCREASE: high growth rate | "]);
    store.push(0, Channel::StepLog, &["0.8", "0.8", "50", "50", "DECREASE: growth stalled | RESCUE DILUTION | "]);
    store.push(0, Channel::StepLog, &["1", "1", "50", "50", "RESCUE DILUTION | "]);
    push_rates(&mut store, 0, &[1.5, 2.0, 2.5, 2.8, 3.0], 0.07);
    push_ods(&mut store, 0, 10.0, 1.8);

    let mut ctl = controller(vec![vessel(0)]);
    let mut transport = RecordingTransport::default();
    let tick = ctl.tick(&mut store, &mut transport, 10.0).unwrap();

    let sel = &report(&tick.outcomes[0]).selection;
    assert_eq!(sel.level, 25.0);
    assert_eq!(sel.rescue_s, None);
    assert_eq!(sel.status, "DECREASE: growth stalled | ");
    assert!(tick.fluidic.is_noop());
    assert!(transport.sent.is_empty());
}

#[test]
fn scenario_c_turbidostat_dilution_is_clamped() {
    let mut store = MemoryLogStore::new();
    store.push(0, Channel::StepLog, &["0", "0", "0", "0", ""]);
    push_ods(&mut store, 0, 1.0, 2.5);

    let mut v = vessel(0);
    v.turbidostat.influx_flow_rate = 0.2;
    let mut ctl = Controller::builder()
        .with_config(ControllerConfig {
            vessels: vec![v],
            ..ControllerConfig::default()
        })
        .with_growth(FixedGrowth(0.05))
        .build()
        .unwrap();
    let mut transport = RecordingTransport::default();
    let tick = ctl.tick(&mut store, &mut transport, 1.0).unwrap();

    let r = report(&tick.outcomes[0]);
    assert!(r.turbidostat.curve_completed);
    assert_eq!(r.turbidostat.dilution_s, Some(20.0));
    assert_eq!(r.selection.phase, SelectionPhase::AwaitingBaseline);
    assert!(!r.selection.logged);
    assert_eq!(transport.sent[0].value[0], "20.00");
    assert_eq!(transport.sent[0].value[16], "25.00");
    assert_eq!(store.records(0, Channel::GrowthRate).len(), 1);
}

#[test]
fn scenario_d_above_target_is_not_dosed() {
    let mut store = MemoryLogStore::new();
    store.push(0, Channel::StepLog, &["1", "1", "50", "100", ""]);
    push_rates(&mut store, 0, &[0.2, 0.4, 0.6, 0.8, 1.0], 0.07);
    push_ods(&mut store, 0, 2.0, 1.8);

    let mut ctl = controller(vec![vessel(0)]);
    let mut transport = RecordingTransport::default();
    let tick = ctl.tick(&mut store, &mut transport, 2.0).unwrap();

    let sel = &report(&tick.outcomes[0]).selection;
    assert_eq!(sel.decision, Decision::Hold);
    assert_eq!(sel.bolus_ml, None);
    assert_eq!(sel.concentration, 100.0);
    assert!(tick.fluidic.is_noop());
    assert!(store.records(0, Channel::DosingLog).is_empty());
}

#[test]
fn scenario_e_light_program() {
    let mut v = vessel(0);
    v.light = LightSchedule {
        acclimation_time_h: 4.0,
        acclimation_light: 100.0,
        cycle_start_h: 4.0,
        on_length_h: 2.0,
        off_length_h: 1.0,
        final_light: 1000.0,
    };
    let mut ctl = Controller::builder()
        .with_config(ControllerConfig {
            vessels: vec![v],
            light_enabled: true,
            ..ControllerConfig::default()
        })
        .with_growth(NoGrowth)
        .build()
        .unwrap();
    let mut store = MemoryLogStore::new();
    let mut transport = RecordingTransport::default();

    let early = ctl.tick(&mut store, &mut transport, 3.0).unwrap();
    let (_, r) = &early.lights[0];
    assert_eq!(r.as_ref().unwrap().state.phase, LightPhase::Acclimating);

    let late = ctl.tick(&mut store, &mut transport, 5.0).unwrap();
    let (_, r) = &late.lights[0];
    let r = r.as_ref().unwrap();
    assert_eq!(r.state.phase, LightPhase::CyclingOn);
    assert_eq!(r.state.ue, 1000.0);

    // the vessel itself was skipped (no logs), but light still went out
    assert!(matches!(late.outcomes[0], VesselOutcome::Skip(_)));
    let lights: Vec<_> = transport.sent_for("light").collect();
    assert_eq!(lights.len(), 2);
    assert_eq!(lights[1].value[0], "1000");
    assert_eq!(lights[1].value.len(), 32);
}

/// OD samples at 2.00 to 2.05 h that drop from 2.0 to 1.6 halfway through.
fn push_dilution_window(store: &mut MemoryLogStore, v: usize) {
    for (t, od) in [
        ("2", "2"),
        ("2.01", "2"),
        ("2.02", "2"),
        ("2.03", "1.6"),
        ("2.04", "1.6"),
        ("2.05", "1.6"),
    ] {
        store.push(v, Channel::Od, &[t, od]);
    }
}

#[rstest]
#[case::on_a_sample("2.02")]
#[case::between_samples("2.025")]
fn measured_dilution_lowers_concentration_and_redoses(#[case] pump_time: &str) {
    let mut store = MemoryLogStore::new();
    store.push(0, Channel::StepLog, &["1", "1", "50", "50", ""]);
    push_rates(&mut store, 0, &[1.2, 1.4, 1.6, 1.8, 2.0], 0.07);
    push_dilution_window(&mut store, 0);
    store.push(0, Channel::PumpLog, &[pump_time, "10"]);

    let mut ctl = controller(vec![vessel(0)]);
    let mut transport = RecordingTransport::default();
    let tick = ctl.tick(&mut store, &mut transport, 2.06).unwrap();

    let sel = &report(&tick.outcomes[0]).selection;
    assert_eq!(sel.decision, Decision::Hold);
    // medians 2.0 -> 1.6; conc 50 * 0.8 = 40, then 25 * (40 - 50) / (50 - 1000) mL
    assert_eq!(sel.status, "DILUTION 0.800X | SELECTION CHEMICAL ADDED 0.263mL | ");
    assert_eq!(sel.concentration, 50.0);
    assert_eq!(tick.fluidic.slot(32), Some(0.26));
    assert_eq!(transport.sent.len(), 1);

    // Without a new OD sample the same dilution is not counted twice.
    let again = ctl.tick(&mut store, &mut transport, 2.07).unwrap();
    let sel = &report(&again.outcomes[0]).selection;
    assert_eq!(sel.status, "");
    assert_eq!(sel.concentration, 50.0);
    assert!(!sel.logged);
    assert_eq!(store.records(0, Channel::StepLog).len(), 2);
    assert_eq!(store.records(0, Channel::DosingLog).len(), 1);
}

#[test]
fn low_od_skips_dosing_with_a_status() {
    let mut store = MemoryLogStore::new();
    store.push(0, Channel::StepLog, &["1", "1", "50", "40", ""]);
    push_rates(&mut store, 0, &[1.2, 1.4, 1.6, 1.8, 2.0], 0.07);
    push_ods(&mut store, 0, 2.06, 1.0);

    let mut ctl = controller(vec![vessel(0)]);
    let mut transport = RecordingTransport::default();
    let tick = ctl.tick(&mut store, &mut transport, 2.06).unwrap();

    let sel = &report(&tick.outcomes[0]).selection;
    assert_eq!(sel.status, "SKIPPED SELECTION CHEMICAL - LOW OD 1.00 | ");
    assert_eq!(sel.bolus_ml, None);
    assert_eq!(sel.concentration, 40.0);
    assert!(sel.logged);
    assert!(tick.fluidic.is_noop());
    assert!(transport.sent.is_empty());
    assert!(store.records(0, Channel::DosingLog).is_empty());
}

#[rstest]
#[case::from_the_first_step("25", "25")]
#[case::already_at_zero("0", "10")]
fn low_growth_on_the_first_step_drops_to_zero_with_rescue(
    #[case] level: &str,
    #[case] conc: &str,
) {
    let mut store = MemoryLogStore::new();
    store.push(0, Channel::StepLog, &["1", "1", level, conc, ""]);
    push_rates(&mut store, 0, &[8.0, 8.5, 9.0, 9.5, 9.9], 0.01);
    push_ods(&mut store, 0, 10.0, 1.8);

    let mut ctl = controller(vec![vessel(0)]);
    let mut transport = RecordingTransport::default();
    let tick = ctl.tick(&mut store, &mut transport, 10.0).unwrap();

    let sel = &report(&tick.outcomes[0]).selection;
    assert_eq!(sel.decision, Decision::Decrease(StepReason::LowGrowth));
    assert_eq!(sel.level, 0.0);
    assert_eq!(sel.status, "DECREASE: low growth rate | RESCUE DILUTION | ");
    // factor floors at rescue_threshold 0.5: -ln(0.5) * 25 / 1.0
    assert_eq!(sel.rescue_s, Some(17.33));
    assert_eq!(tick.fluidic.slot(0), Some(17.33));
    assert_eq!(tick.fluidic.slot(32), None);

    let log = store.records(0, Channel::StepLog);
    assert_eq!(&log.last().unwrap()[..4], &["10", "10", "0", conc]);
}
