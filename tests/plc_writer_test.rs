// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scale-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC writer behaviour against the in-memory PLC

use std::time::Duration;

use rust_scale_gateway::plc::{DeviceAddress, MockPlc, PlcWriter, RetrySettings, WritePolicy};
use rust_scale_gateway::GatewayError;

fn validated(max_attempts: u32) -> WritePolicy {
    WritePolicy::RetryValidated(RetrySettings {
        max_attempts,
        settle_delay: Duration::ZERO,
        initial_backoff: Duration::ZERO,
        backoff_multiplier: 2.0,
        max_backoff: Duration::ZERO,
    })
}

fn device(text: &str) -> DeviceAddress {
    text.parse().unwrap()
}

async fn connected(plc: &MockPlc, policy: WritePolicy) -> PlcWriter {
    let mut writer = PlcWriter::new(Box::new(plc.clone()), policy, 100);
    writer
        .connect_with_retries(1, Duration::ZERO)
        .await
        .unwrap();
    writer
}

#[tokio::test]
async fn test_validated_write_confirmed_first_time() {
    let plc = MockPlc::new();
    let mut writer = connected(&plc, validated(3)).await;

    writer.write(&device("D6364"), 12.5).await.unwrap();

    assert_eq!(plc.dword(&device("D6364")), 1250);
    let stats = plc.stats();
    assert_eq!(stats.word_writes, 1);
    assert_eq!(stats.word_reads, 1);
}

#[tokio::test]
async fn test_validated_write_gives_up_after_max_attempts() {
    let plc = MockPlc::new();
    plc.set_ignore_writes(true);
    let mut writer = connected(&plc, validated(3)).await;

    let err = writer.write(&device("D6364"), 12.5).await.unwrap_err();
    match err {
        GatewayError::PlcWriteValidation {
            head_device,
            attempts,
            expected,
            actual,
        } => {
            assert_eq!(head_device, "D6364");
            assert_eq!(attempts, 3);
            assert_eq!(expected, 1250);
            assert_eq!(actual, Some(0));
        }
        other => panic!("unexpected error {}", other),
    }
    assert_eq!(plc.stats().word_writes, 3);
    assert_eq!(plc.stats().word_reads, 3);

    // Not fatal: the writer keeps its session and the next write succeeds
    plc.set_ignore_writes(false);
    writer.write(&device("D6364"), 12.5).await.unwrap();
    assert!(writer.is_connected());
}

#[tokio::test]
async fn test_fast_path_skips_read_back() {
    let plc = MockPlc::new();
    let mut writer = connected(&plc, WritePolicy::FastPath).await;

    writer.write(&device("D6464"), 7.25).await.unwrap();
    writer.set_signal(&device("M3400"), true).await.unwrap();

    assert_eq!(plc.dword(&device("D6464")), 725);
    assert!(plc.bit(&device("M3400")));
    let stats = plc.stats();
    assert_eq!(stats.word_writes, 1);
    assert_eq!(stats.word_reads, 0);
    assert_eq!(stats.bit_reads, 0);
}

#[tokio::test]
async fn test_validated_write_reconnects_after_connection_error() {
    let plc = MockPlc::new();
    let mut writer = connected(&plc, validated(3)).await;
    assert_eq!(plc.stats().connects, 1);

    plc.fail_next_operations(1);
    writer.write(&device("D6564"), 3.0).await.unwrap();

    assert_eq!(plc.dword(&device("D6564")), 300);
    assert_eq!(plc.stats().connects, 2);
}

#[tokio::test]
async fn test_fast_path_next_write_reconnects() {
    let plc = MockPlc::new();
    let mut writer = connected(&plc, WritePolicy::FastPath).await;

    plc.fail_next_operations(1);
    let err = writer.write(&device("D6364"), 1.5).await.unwrap_err();
    assert!(matches!(err, GatewayError::PlcConnection { .. }));
    assert!(!writer.is_connected());

    writer.write(&device("D6364"), 1.5).await.unwrap();
    assert_eq!(plc.dword(&device("D6364")), 150);
    assert_eq!(plc.stats().connects, 2);
}

#[tokio::test]
async fn test_negative_and_out_of_range_values() {
    let plc = MockPlc::new();
    let mut writer = connected(&plc, validated(2)).await;

    writer.write(&device("D100"), -0.35).await.unwrap();
    assert_eq!(plc.dword(&device("D100")), -35);

    let err = writer.write(&device("D100"), 1e12).await.unwrap_err();
    assert!(matches!(err, GatewayError::ValueOutOfRange { .. }));
    // Nothing reached the PLC for the rejected value
    assert_eq!(plc.stats().word_writes, 1);
}

#[tokio::test]
async fn test_reset_and_signal_clear() {
    let plc = MockPlc::new();
    let mut writer = connected(&plc, validated(3)).await;

    writer.write(&device("D6364"), 99.99).await.unwrap();
    writer.set_signal(&device("M3300"), true).await.unwrap();
    writer.reset(&device("D6364")).await.unwrap();
    writer.set_signal(&device("M3300"), false).await.unwrap();

    assert_eq!(plc.dword(&device("D6364")), 0);
    assert!(!plc.bit(&device("M3300")));
    assert_eq!(plc.stats().bit_reads, 2);
}

#[tokio::test]
async fn test_wrong_device_kinds_rejected() {
    let plc = MockPlc::new();
    let mut writer = connected(&plc, WritePolicy::FastPath).await;

    assert!(writer.write(&device("M100"), 1.0).await.is_err());
    assert!(writer.set_signal(&device("D100"), true).await.is_err());
    assert_eq!(plc.stats().word_writes + plc.stats().bit_writes, 0);
}

#[tokio::test]
async fn test_startup_connect_retries() {
    let plc = MockPlc::new();
    plc.refuse_connections(2);
    let mut writer = PlcWriter::new(Box::new(plc.clone()), WritePolicy::FastPath, 100);
    writer
        .connect_with_retries(3, Duration::from_millis(1))
        .await
        .unwrap();
    assert!(writer.is_connected());

    let refused = MockPlc::new();
    refused.refuse_connections(5);
    let mut writer = PlcWriter::new(Box::new(refused), WritePolicy::FastPath, 100);
    let err = writer
        .connect_with_retries(5, Duration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
}
