// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the RegisterStoreModbusServer implementation
//!
//! These tests validate the Modbus server functionality by starting a server
//! instance backed by a shared Register Store and connecting to it via a
//! Modbus client. Various Modbus operations are tested including reading
//! input registers, reading/writing holding registers, and error conditions.

use std::str::FromStr;
use std::time::Duration;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::time;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

use laser_geometry_core::modbus::RegisterStoreModbusServer;
use laser_geometry_core::registers::{map::holding, Bank, RegisterStore};

extern crate tokio;

/// Starts a Modbus server backed by `store` on an OS-assigned port.
async fn start_test_server(
    store: Arc<RegisterStore>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), Box<dyn std::error::Error>> {
    let socket_addr = SocketAddr::from_str("127.0.0.1:0").unwrap();
    let listener = TcpListener::bind(socket_addr).await?;
    let socket_addr = listener.local_addr()?;

    let server = Server::new(listener);
    let on_connected = move |stream, socket_addr| {
        let store = store.clone();
        async move {
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(RegisterStoreModbusServer::new(store.clone())))
            })
        }
    };

    let on_process_error = |err| {
        eprintln!("Server error: {}", err);
    };

    let handle = tokio::spawn(async move {
        if let Err(e) = server.serve(&on_connected, on_process_error).await {
            eprintln!("Server error: {}", e);
        }
    });

    time::sleep(Duration::from_millis(100)).await;

    Ok((socket_addr, handle))
}

#[tokio::test]
async fn test_read_input_registers() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RegisterStore::new());
    store.set_word(Bank::Input, 0, 1234);
    store.set_word(Bank::Input, 1, 5678);

    let (socket_addr, _server_handle) = start_test_server(store).await?;
    let mut ctx = tcp::connect(socket_addr).await?;

    let data = ctx.read_input_registers(0, 2).await??;
    assert_eq!(data, vec![1234, 5678]);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_read_holding_registers() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RegisterStore::new());
    store.set_words(Bank::Holding, 0, &[10, 20, 30, 40]);

    let (socket_addr, _server_handle) = start_test_server(store).await?;
    let mut ctx = tcp::connect(socket_addr).await?;

    let data = ctx.read_holding_registers(0, 4).await??;
    assert_eq!(data, vec![10, 20, 30, 40]);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_write_single_register() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RegisterStore::new());
    let (socket_addr, _server_handle) = start_test_server(store.clone()).await?;
    let mut ctx = tcp::connect(socket_addr).await?;

    ctx.write_single_register(holding::COMMAND, 16).await??;

    let data = ctx.read_holding_registers(holding::COMMAND, 1).await??;
    assert_eq!(data, vec![16]);
    assert_eq!(store.get_word(Bank::Holding, holding::COMMAND), 16);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_write_multiple_registers() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RegisterStore::new());
    let (socket_addr, _server_handle) = start_test_server(store).await?;
    let mut ctx = tcp::connect(socket_addr).await?;

    let values = vec![101, 202, 303];
    ctx.write_multiple_registers(holding::D12, &values).await??;

    let data = ctx.read_holding_registers(holding::D12, 3).await??;
    assert_eq!(data, values);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_register_address() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RegisterStore::new());
    let (socket_addr, _server_handle) = start_test_server(store).await?;
    let mut ctx = tcp::connect(socket_addr).await?;

    // Input bank is 300 words long; this read runs past the end.
    let result = ctx.read_input_registers(299, 5).await?;

    assert!(result.is_err());
    if let Err(error) = result {
        assert_eq!(error.to_string(), "Illegal data address");
    }

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_function() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RegisterStore::new());
    let (socket_addr, _server_handle) = start_test_server(store).await?;
    let mut ctx = tcp::connect(socket_addr).await?;

    let result = ctx.read_coils(0, 1).await?;

    assert!(result.is_err());
    if let Err(error) = result {
        assert_eq!(error.to_string(), "Illegal function");
    }

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_multiple_clients_see_shared_store() -> Result<(), Box<dyn std::error::Error>> {
    let test_register = holding::ERROR_RESET;
    let test_value = 1;

    let store = Arc::new(RegisterStore::new());
    let (socket_addr, _server_handle) = start_test_server(store).await?;

    let mut client1 = tcp::connect(socket_addr).await?;
    let mut client2 = tcp::connect(socket_addr).await?;

    client1
        .write_single_register(test_register, test_value)
        .await??;

    time::sleep(Duration::from_millis(100)).await;

    let data = client2.read_holding_registers(test_register, 1).await??;
    assert_eq!(data, vec![test_value]);

    client1.disconnect().await?;
    client2.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_command_register_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(RegisterStore::new());
    let (socket_addr, _server_handle) = start_test_server(store.clone()).await?;
    let mut ctx = tcp::connect(socket_addr).await?;

    // Simulate an HMI driving the command register and the core mirroring a
    // status code into the input bank.
    ctx.write_single_register(holding::COMMAND, 10).await??;
    store.set_word(Bank::Input, laser_geometry_core::registers::map::input::STATUS, 10);

    let command = ctx.read_holding_registers(holding::COMMAND, 1).await??;
    let status = ctx
        .read_input_registers(laser_geometry_core::registers::map::input::STATUS, 1)
        .await??;

    assert_eq!(command, vec![10]);
    assert_eq!(status, vec![10]);

    ctx.disconnect().await?;
    Ok(())
}
