//-
// Copyright (c) 2026, The Relaymap Developers
//
// This file is part of Relaymap.
//
// Relaymap is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public  License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Relaymap is distributed in the hope that  it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Relaymap. If not, see <http://www.gnu.org/licenses/>.

//! The relay daemon's consumer loop.
//!
//! One iteration: ensure the broker connection is up with the new-mail
//! queue declared and consuming, take one delivery (bounded wait), run it
//! through the registration pipeline, and publish the result on the
//! recipient's fanout exchange. Any transport failure tears the connection
//! down; the loop sleeps a fixed interval and reconnects. Termination
//! signals are checked between operations, never mid-I/O, and the broker
//! connection is released on the way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::Duration;

use log::{info, warn};

use crate::broker::transport::{
    BrokerTransport, Consumed, State, CONTROL_CHANNEL, RECONNECT_DELAY,
};
use crate::relay::env::{
    default_backends, IndexMetadata, TemplateDirectory,
};
use crate::relay::inbound::decode_delivery;
use crate::relay::register::{publish_registered, Registrar};
use crate::support::error::Error;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

/// Upper bound on one blocking consume, so signals are noticed promptly.
const CONSUME_TIMEOUT: Duration = Duration::from_secs(1);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_termination(_: i32) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> nix::Result<()> {
    use nix::sys::signal::{
        sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal,
    };

    let action = SigAction::new(
        SigHandler::Handler(handle_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGTERM, &action)?;
        sigaction(Signal::SIGINT, &action)?;
    }
    Ok(())
}

pub(super) fn run(config: &SystemConfig) -> Sysexit {
    if let Err(e) = install_signal_handlers() {
        eprintln!("Failed to install signal handlers: {}", e);
        return EX_OSERR;
    }

    let backends = default_backends();
    let backend = match backends.lookup(&config.broker.backend) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("{}", e);
            return EX_CONFIG;
        },
    };

    let directory =
        TemplateDirectory::new(&config.directory.folder_uri_template);
    let metadata = IndexMetadata::new(&config.paths.mapping_root);
    let registrar = Registrar::new(
        &directory,
        &metadata,
        backend,
        &config.paths.mapping_root,
    );

    let mut transport = BrokerTransport::new(config.broker.clone());
    info!(
        "Relaying new-mail events from queue '{}'",
        config.broker.new_mail_queue
    );

    while !SHUTDOWN.load(Ordering::SeqCst) {
        if !transport.is_alive() {
            if let Err(e) = bring_up(&mut transport, config) {
                warn!("Broker connection failed: {}", e);
                sleep(RECONNECT_DELAY);
                continue;
            }
        }

        match transport.consume(CONSUME_TIMEOUT) {
            Ok(Consumed::Empty) => (),
            Ok(Consumed::Message(delivery)) => {
                handle_delivery(&registrar, &mut transport, &delivery.body);
            },
            Err(e) => {
                warn!("Broker consume failed: {}", e);
                sleep(RECONNECT_DELAY);
            },
        }
    }

    info!("Shutting down");
    transport.disconnect();
    EX_OK
}

fn bring_up(
    transport: &mut BrokerTransport,
    config: &SystemConfig,
) -> Result<(), Error> {
    transport.connect()?;
    let queue = transport.declare(
        CONTROL_CHANNEL,
        &config.broker.exchange,
        "direct",
        &config.broker.new_mail_queue,
        &config.broker.new_mail_routing_key,
    )?;
    transport.start_consumer(CONTROL_CHANNEL, &queue)?;
    debug_assert_eq!(State::Consuming, transport.state());
    Ok(())
}

/// Process one inbound delivery end to end.
///
/// Malformed bodies and benign data errors are logged and dropped; a
/// transport error during the publish has already torn the connection
/// down, so the outer loop reconnects.
fn handle_delivery(
    registrar: &Registrar<'_>,
    transport: &mut BrokerTransport,
    body: &[u8],
) {
    let delivery = match decode_delivery(body) {
        Some(delivery) => delivery,
        None => return,
    };

    let registered = match registrar.register_message(
        &delivery.user,
        &delivery.folder,
        delivery.uid,
    ) {
        Ok(Some(registered)) => registered,
        Ok(None) => return,
        Err(e) => {
            warn!(
                "Failed to register message for {}: {}",
                delivery.user, e
            );
            return;
        },
    };

    // Publishing happens on its own channel so a channel-level rejection
    // does not disturb the consumer
    let publish_channel = match transport.get_free_channel() {
        Ok(channel) => channel,
        Err(e) => {
            warn!("No channel available for publishing: {}", e);
            return;
        },
    };
    if let Err(e) = transport.open_channel(publish_channel) {
        warn!("Failed to open publish channel: {}", e);
        return;
    }

    if let Err(e) = publish_registered(transport, publish_channel, &registered)
    {
        warn!(
            "Failed to publish notification for {}: {}",
            registered.user, e
        );
        return;
    }

    let _ = transport.close_channel(publish_channel);
}
