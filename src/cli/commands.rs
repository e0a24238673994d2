//! CLI commands for the SHARP node
//!
//! Implements all command handlers for the CLI interface.

use crate::api::{ApiError, SendRequest, SendResponse};
use crate::config::ServerConfig;
use crate::context::AppContext;
use crate::core::{Address, Envelope};
use crate::crypto::{self, Disposition};
use crate::mining::{Minter, TokenPool, DEFAULT_POOL_SIZE};
use crate::network::{DeliveryClient, Node, PeerDiscovery};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// A message composed on the command line
pub struct Draft {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Run the node until Ctrl-C
pub async fn cmd_serve(config: ServerConfig) -> CliResult<()> {
    println!("📬 Starting SHARP node for {}", config.domain);
    println!("   ├─ SHARP: {}:{}", config.bind_host, config.sharp_port);
    println!("   ├─ HTTP:  {}:{}", config.bind_host, config.http_port());
    println!("   └─ Data:  {:?}", config.data_dir);

    let ctx = AppContext::from_config(config)?;
    Node::new(Arc::new(ctx))
        .run()
        .await
        .map_err(|e| e as Box<dyn std::error::Error>)?;

    println!("👋 Node stopped");
    Ok(())
}

/// Submit a message through a server's HTTP API, paying for it with a pooled stamp
pub async fn cmd_send(
    server: &str,
    token: &str,
    draft: Draft,
    bits: u32,
    scheduled_at: Option<&str>,
) -> CliResult<()> {
    // Both ends must be valid before spending CPU on a stamp
    Address::parse(&draft.from)?;
    Address::parse(&draft.to)?;

    let scheduled_at = scheduled_at
        .map(|s| DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)))
        .transpose()?;

    println!("⛏️  Minting {}-bit stamp for {}", bits, draft.to);
    let pool = Arc::new(TokenPool::new(bits, DEFAULT_POOL_SIZE)?);
    let stamp = pool.take(&draft.to).await;
    pool.shutdown();
    let stamp = stamp?;

    let request = SendRequest {
        from: draft.from,
        to: draft.to,
        subject: draft.subject,
        body: draft.body,
        content_type: None,
        html_body: None,
        hashcash: Some(stamp),
        scheduled_at,
        attachments: Vec::new(),
        expires_at: None,
        self_destruct: false,
    };

    let url = format!("{}/api/send", server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .bearer_auth(token)
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error: ApiError = response.json().await?;
        println!("❌ Server refused the message ({}): {}", status, error.message);
        return Ok(());
    }

    let sent: SendResponse = response.json().await?;
    println!("📤 {}", sent.message);
    println!("   ├─ ID: {}", sent.id);
    println!("   ├─ From: {}", request.from);
    println!("   ├─ To: {}", request.to);
    println!("   └─ Status: {}", sent.status.as_str());
    Ok(())
}

/// Hand a message straight to the recipient's SHARP host
pub async fn cmd_deliver(draft: Draft, timeout_secs: u64) -> CliResult<()> {
    let envelope = Envelope::new(
        Address::parse(&draft.from)?,
        Address::parse(&draft.to)?,
        &draft.subject,
        &draft.body,
    );

    let client = DeliveryClient::new(PeerDiscovery::system()?, Duration::from_secs(timeout_secs));
    println!(
        "📨 Delivering {} -> {} (deadline {:?})",
        envelope.from,
        envelope.to,
        client.timeout()
    );
    match client.deliver(&envelope).await {
        Ok(ack) => {
            println!("✅ Delivered to {}", ack.peer);
            println!("   └─ Peer said: {}", ack.message);
        }
        Err(e) => println!("❌ Delivery failed: {}", e),
    }
    Ok(())
}

/// Mint a single stamp and show what it cost
pub fn cmd_hashcash_mint(resource: &str, bits: u32) -> CliResult<()> {
    println!("⛏️  Minting stamp for {} at {} bits", resource, bits);

    let (header, stats) = Minter::new(bits)?.mint(resource, Utc::now());
    let digest = crypto::sha1(header.as_bytes());

    println!("\n   {}", header);
    println!("   ├─ SHA-1: {}", crypto::sha1_hex(header.as_bytes()));
    println!("   ├─ Zero bits: {}", crypto::leading_zero_bits(&digest));
    println!("   ├─ Time: {}ms", stats.time_ms);
    println!("   ├─ Attempts: {}", stats.hash_attempts);
    println!("   └─ Hash rate: {:.2} H/s", stats.hash_rate);
    Ok(())
}

/// Score a stamp against a resource the way the submission path does
pub fn cmd_hashcash_check(header: &str, resource: &str) -> CliResult<()> {
    let (score, reason) = match crypto::evaluate(Some(header), resource, Utc::now()) {
        Ok(score) => (score, None),
        Err(e) => (e.score(), Some(e.to_string())),
    };

    let verdict = match score.disposition() {
        Disposition::Accept => "accepted",
        Disposition::AcceptAsSpam => "accepted as spam",
        Disposition::Reject => "rejected",
    };

    println!("🔍 Hashcash score: {} ({:?})", score.value(), score);
    println!("   └─ Verdict: {}", verdict);
    if let Some(reason) = reason {
        println!("   Reason: {}", reason);
    }
    Ok(())
}

/// Resolve the SHARP host for an address (`user#domain[:port]`) or a bare domain
pub async fn cmd_discover(target: &str) -> CliResult<()> {
    let discovery = PeerDiscovery::system()?;

    let result = if target.contains(crate::core::ADDRESS_SEPARATOR) {
        discovery.resolve(&Address::parse(target)?).await
    } else {
        discovery.discover(target).await
    };

    match result {
        Ok(peer) => {
            println!("🌐 Peer for {}", target);
            println!("   ├─ Domain: {}", peer.domain);
            println!("   ├─ Dial: {}", peer.dial_addr());
            println!("   └─ Protocol: {}", peer.protocol_version);
        }
        Err(e) => println!("❌ Discovery failed: {}", e),
    }
    Ok(())
}
