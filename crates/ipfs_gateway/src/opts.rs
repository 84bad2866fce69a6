// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{crate_version, Parser};

#[derive(Debug, Parser)]
#[clap(
    name = "ipfs_gateway",
    about = "HTTP gateway for content-addressed storage",
    version = crate_version!()
)]
pub struct Opts {
    #[clap(
        short,
        long,
        help = "Port to listen on.",
        default_value = "3000",
        env = "IPFS_GATEWAY_PORT"
    )]
    pub port: u16,

    #[clap(
        long,
        help = "Address to listen on.",
        default_value = "0.0.0.0",
        env = "IPFS_GATEWAY_BIND"
    )]
    pub bind: IpAddr,

    #[clap(
        long,
        help = "Maximum simultaneously connected clients before connections are no longer accepted",
        default_value = "1024",
        env = "IPFS_GATEWAY_MAX_CONNECTIONS"
    )]
    pub max_connections: usize,

    #[clap(
        long,
        help = "Authority assumed for requests without a usable Host header",
        default_value = "localhost",
        env = "IPFS_GATEWAY_DEFAULT_HOST"
    )]
    pub default_host: String,

    #[clap(
        long,
        help = "Directory to keep content in. Content is kept in memory (and lost on exit) if unset.",
        env = "IPFS_GATEWAY_STORE_DIR"
    )]
    pub store_dir: Option<PathBuf>,

    #[clap(
        long,
        help = "Size in bytes of the chunks content is streamed back in",
        default_value = "262144",
        env = "IPFS_GATEWAY_BLOCK_SIZE"
    )]
    pub block_size: usize,

    #[clap(
        long,
        help = "Largest request body accepted by /ipfs/add, in bytes",
        default_value = "16777216",
        env = "IPFS_GATEWAY_MAX_UPLOAD_SIZE"
    )]
    pub max_upload_size: usize,

    #[clap(
        long,
        help = "File containing the shared secret that identity tokens are signed with (HS256). Every token is rejected if unset.",
        env = "IPFS_GATEWAY_TOKEN_SECRET_FILE"
    )]
    pub token_secret_file: Option<PathBuf>,

    #[clap(
        long,
        help = "Clock skew tolerated when checking token expiry, in seconds",
        default_value = "60",
        env = "IPFS_GATEWAY_TOKEN_LEEWAY"
    )]
    pub token_leeway: u64,
}

impl Opts {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = Opts::try_parse_from(["ipfs_gateway"]).unwrap();
        assert_eq!(opts.address(), SocketAddr::from(([0, 0, 0, 0], 3000)));
        assert_eq!(opts.max_connections, 1024);
        assert_eq!(opts.default_host, "localhost");
        assert_eq!(opts.store_dir, None);
        assert_eq!(opts.block_size, 256 * 1024);
        assert_eq!(opts.max_upload_size, 16 * 1024 * 1024);
        assert_eq!(opts.token_secret_file, None);
        assert_eq!(opts.token_leeway, 60);
    }

    #[test]
    fn flags_override_defaults() {
        let opts = Opts::try_parse_from([
            "ipfs_gateway",
            "--port",
            "8080",
            "--bind",
            "127.0.0.1",
            "--store-dir",
            "/var/lib/gateway",
            "--token-secret-file",
            "/run/secrets/token",
        ])
        .unwrap();
        assert_eq!(opts.address(), SocketAddr::from(([127, 0, 0, 1], 8080)));
        assert_eq!(opts.store_dir, Some(PathBuf::from("/var/lib/gateway")));
        assert_eq!(
            opts.token_secret_file,
            Some(PathBuf::from("/run/secrets/token"))
        );
    }
}
