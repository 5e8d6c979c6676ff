//! The front-end: bind the shared UDP socket, spawn the resolver workers,
//! wait for them and report the final counters.
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{error, info};

use crate::config::{Config, UDP_POLL_INTERVAL};
use crate::error::{DnsError, DnsResult};
use crate::filter::Filter;
use crate::resolver::Resolver;
use crate::stats::Stats;

/// Run the proxy until a termination signal arrives. Each worker receives
/// independently from a clone of the same socket; the kernel does the load
/// sharing, so no per-flow affinity is needed.
pub fn run(config: Arc<Config>, filter: Arc<Filter>) -> DnsResult<()> {
    let bind_addr = if config.proxy_addr_any {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.proxy_port)
    } else {
        SocketAddr::new(config.proxy_addr, config.proxy_port)
    };

    let socket = UdpSocket::bind(bind_addr)?;
    // the read timeout doubles as the workers' maintenance tick
    socket.set_read_timeout(Some(UDP_POLL_INTERVAL))?;

    let stats = Arc::new(Stats::new());
    let shutdown = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("termination signal received");
        flag.store(true, Ordering::Relaxed);
    })
    .map_err(|e| DnsError::Config(format!("cannot install signal handler: {}", e)))?;

    info!(
        "listening on {} with {} resolvers, upstream {}",
        bind_addr, config.resolvers, config.server.name
    );

    let mut workers = Vec::with_capacity(config.resolvers);
    for id in 0..config.resolvers {
        let socket = socket.try_clone()?;
        let config = Arc::clone(&config);
        let filter = Arc::clone(&filter);
        let stats = Arc::clone(&stats);
        let shutdown = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name(format!("resolver-{}", id))
            .spawn(move || {
                Resolver::new(id, socket, config, filter, stats, shutdown).run();
            })?;
        workers.push(handle);
    }

    for handle in workers {
        if handle.join().is_err() {
            error!("a resolver worker panicked");
        }
    }

    info!("{}", stats.snapshot());
    Ok(())
}
