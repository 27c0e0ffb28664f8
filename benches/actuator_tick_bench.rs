use criterion::{criterion_group, criterion_main, Criterion};
use std::{hint::black_box, sync::Arc};

use exoboot_controller::{
    clock::MonotonicClock,
    comms::{
        message::{GaitEstimate, Message, MessageBody},
        router::Inbox,
    },
    config::{ControlConfig, ProfileConfig, ThermalConfig, TransmissionConfig},
    control::{
        actuator_loop::ActuatorLoop, profile::AssistanceProfile, thermal::ThermalModel,
        transmission::TransmissionRatio,
    },
    device::{
        DeviceDriver,
        sim::{BENCH_DORSI_OFFSET, BENCH_MOTOR_CURVE, SimDriver},
    },
    events::Events,
    model::{
        calibration::CalibrationRecord,
        side::{Side, SideConfig},
    },
};

fn build_loop() -> (ActuatorLoop, Inbox) {
    let driver = SimDriver::new();
    let handle = driver.attach("bench", 1);
    handle.set_angles(30.0, 0.0);
    let device = driver.open("bench", 230_400).expect("sim port");
    let cal = CalibrationRecord::from_motor_curve(BENCH_MOTOR_CURVE.to_vec(), BENCH_DORSI_OFFSET).expect("bench curve");
    let events = Events::new();
    events.arm();
    events.pause.set();
    let inbox = Inbox::default();
    let lp = ActuatorLoop::new(
        device,
        SideConfig { side: Side::Left, motor_sign: -1, ank_enc_sign: 1 },
        Arc::new(TransmissionRatio::new(&cal, &TransmissionConfig::default())),
        Arc::new(AssistanceProfile::new(&ProfileConfig::default()).expect("default profile")),
        ThermalModel::new(&ThermalConfig::default()),
        inbox.clone(),
        events,
        MonotonicClock::new(),
        &ControlConfig::default(),
        20.0,
        1.2,
    );
    (lp, inbox)
}

/// Drain, profile lookup, current vetting and device write for one tick.
fn actuator_tick_bench(c: &mut Criterion) {
    let (mut lp, inbox) = build_loop();
    inbox.push(Message::new(
        "gait",
        MessageBody::GaitEstimate(GaitEstimate { hs_time: 0.0, stride_period: 1.2, in_swing: false, peak_torque: None }),
    ));

    c.bench_function("actuator_tick", |b| {
        let mut k = 0u64;
        b.iter(|| {
            k += 1;
            let t = (k % 1200) as f64 * 0.001;
            black_box(lp.step(t, 0.001))
        })
    });
}

fn actuator_tick_with_messages_bench(c: &mut Criterion) {
    let (mut lp, inbox) = build_loop();

    c.bench_function("actuator_tick_with_estimate", |b| {
        let mut k = 0u64;
        b.iter(|| {
            k += 1;
            let t = (k % 1200) as f64 * 0.001;
            inbox.push(Message::new(
                "gait",
                MessageBody::GaitEstimate(GaitEstimate { hs_time: 0.0, stride_period: 1.2, in_swing: t > 0.8, peak_torque: None }),
            ));
            lp.step(t, 0.001)
        })
    });
}

criterion_group!(benches, actuator_tick_bench, actuator_tick_with_messages_bench);
criterion_main!(benches);
