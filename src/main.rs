mod account;
mod bundler;
mod codec;
mod config;
mod encoding;
mod error;
mod hashing;
mod paymaster;
mod rpc;
mod signer;
mod types;

use account::{
    attach_delegation_authorization, CreateUserOperationOptions, Eip7702AuthIntent,
    Simple7702Account,
};
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use error::Error;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use paymaster::PaymasterClient;
use rand::rngs::OsRng;
use rand::RngCore;
use signer::{HashSigner, LocalSigner};
use std::str::FromStr;
use std::time::Duration;
use types::{Call, DelegationAuthorization};

#[derive(Parser, Debug)]
#[command(name = "aa7702", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upgrade an EOA into a Simple7702 smart account and mint an NFT in a
    /// single (optionally sponsored) user operation.
    UpgradeAndMint(UpgradeAndMintArgs),
}

#[derive(Args, Debug)]
struct UpgradeAndMintArgs {
    /// Target chain id.
    #[arg(long, env = "CHAIN_ID")]
    chain_id: u64,

    /// Chain node JSON-RPC URL.
    #[arg(long, env = "NODE_URL")]
    node: String,

    /// Bundler RPC URL (must support ERC-4337 JSON-RPC methods).
    #[arg(long, env = "BUNDLER_URL")]
    bundler: String,

    /// Paymaster RPC URL. Omit (together with the policy id) to pay gas from
    /// the EOA instead of sponsoring.
    #[arg(long, env = "PAYMASTER_URL")]
    paymaster_url: Option<String>,

    /// Sponsorship policy id presented to the paymaster.
    #[arg(long, env = "SPONSORSHIP_POLICY_ID")]
    policy_id: Option<String>,

    /// NFT contract with an unrestricted mint(address).
    #[arg(long, default_value = "0x9a7af758aE5d7B6aAE84fe4C5Ba67c041dFE5336")]
    nft: String,

    /// Delegator private key. Omitted: a fresh ephemeral key is generated in
    /// memory (and never persisted).
    #[arg(long, env = "DELEGATOR_PRIVATE_KEY")]
    private_key: Option<String>,

    /// Gas price multiplier in basis points (e.g. 15000 = 1.5x).
    #[arg(long, default_value_t = 10_000)]
    gas_multiplier_bps: u64,

    /// Build, sponsor and sign, but do not submit.
    #[arg(long)]
    dry_run: bool,

    /// Do not wait for the userOp receipt.
    #[arg(long)]
    no_wait: bool,

    /// Max seconds to wait for the receipt. Use 0 to disable the timeout.
    #[arg(long, default_value_t = 180)]
    max_wait_seconds: u64,

    /// Receipt poll interval in milliseconds.
    #[arg(long, default_value_t = 1500)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::UpgradeAndMint(args) => cmd_upgrade_and_mint(args).await,
    }
}

async fn cmd_upgrade_and_mint(args: UpgradeAndMintArgs) -> Result<()> {
    let cfg = Config {
        chain_id: args.chain_id,
        node_url: args.node.clone(),
        bundler_url: args.bundler.clone(),
        paymaster_url: args.paymaster_url.clone(),
        sponsorship_policy_id: args.policy_id.clone(),
    };

    let nft = Address::from_str(&args.nft).context("invalid --nft address")?;

    let wallet = load_or_generate_delegator(args.private_key.clone(), cfg.chain_id)?;
    let owner = wallet.address();
    let hash_signer = LocalSigner::new(wallet);

    let account = Simple7702Account::new(owner);
    println!("delegator EOA:  {owner:?}");
    println!("smart account:  {:?} (same address after upgrade)", account.address());
    println!("delegatee:      {:?}", account.delegatee());
    println!("entryPoint:     {:?}", account.entry_point());

    // Mint the NFT to the upgraded account itself.
    let mint_data = codec::create_call_data(
        codec::function_selector("mint(address)"),
        &["address"],
        vec![ethers::abi::Token::Address(account.address())],
    )?;
    let mint_call = Call::new(nft, U256::zero(), mint_data);

    let options = CreateUserOperationOptions {
        eip7702_auth: Some(Eip7702AuthIntent {
            chain_id: cfg.chain_id,
        }),
        gas_multiplier_bps: args.gas_multiplier_bps,
    };
    let mut op = account
        .create_user_operation(&[mint_call], &cfg.node_url, &cfg.bundler_url, &options)
        .await
        .context("failed to build user operation")?;

    // Sign the EIP-7702 authorization for the delegator's current nonce.
    let auth_nonce = account.delegator_nonce(&cfg.node_url).await?;
    let auth_hash =
        hashing::delegation_authorization_hash(cfg.chain_id, account.delegatee(), auth_nonce);
    let auth_sig = hash_signer.sign_hash(auth_hash).await?;
    attach_delegation_authorization(
        &mut op,
        DelegationAuthorization {
            chain_id: cfg.chain_id,
            address: account.delegatee(),
            nonce: auth_nonce,
            y_parity: auth_sig.y_parity,
            r: auth_sig.r,
            s: auth_sig.s,
        },
    );
    tracing::info!(nonce = auth_nonce, "delegation authorization attached");

    // Optional gas sponsorship. A policy denial is recoverable in principle
    // (retry under another policy, or submit unsponsored); this CLI reports it
    // and stops rather than silently charging the EOA.
    if let Some((paymaster_url, policy_id)) = cfg.sponsorship()? {
        let paymaster = PaymasterClient::new(paymaster_url.to_string());
        match paymaster
            .create_sponsor_paymaster_user_operation(&op, account.entry_point(), policy_id)
            .await
        {
            Ok((sponsored, meta)) => {
                tracing::info!(
                    policy = %meta.policy_id,
                    sponsor = meta.sponsor_name.as_deref().unwrap_or("unknown"),
                    valid_until = meta.valid_until,
                    "user operation sponsored"
                );
                op = sponsored;
            }
            Err(e @ Error::SponsorshipDenied { .. }) => {
                return Err(anyhow!(e).context(
                    "sponsorship denied; retry with a different SPONSORSHIP_POLICY_ID or unset \
                     PAYMASTER_URL to pay gas from the EOA",
                ));
            }
            Err(e) => return Err(e).context("paymaster sponsorship failed"),
        }
    }

    // Hash covers the final gas and paymaster fields; the signature itself is
    // excluded from the pre-image, so signing cannot invalidate the hash.
    let op_hash = hashing::user_operation_hash(&op, account.entry_point(), cfg.chain_id);
    op.signature = hash_signer.sign_hash(op_hash).await?.to_rsv_bytes();

    println!(
        "\nUserOperation (final):\n{}",
        serde_json::to_string_pretty(&encoding::user_op_to_json(&op))?
    );

    if args.dry_run {
        println!("\n--dry-run set: not sending user operation.");
        return Ok(());
    }

    let response = account
        .send_user_operation(&op, &cfg.bundler_url)
        .await
        .context("bundler submission failed")?;
    println!(
        "\nuserOpHash: {}",
        encoding::fmt_h256(response.user_operation_hash)
    );

    if args.no_wait {
        println!("--no-wait set: not waiting for receipt.");
        return Ok(());
    }

    println!("waiting for inclusion...");
    let receipt = match response
        .included(
            Duration::from_millis(args.poll_interval_ms),
            Duration::from_secs(args.max_wait_seconds),
        )
        .await
    {
        Ok(receipt) => receipt,
        Err(e @ Error::Timeout { .. }) => {
            return Err(anyhow!(e).context(
                "inclusion not observed in time; the operation may still land and can be \
                 re-polled under the same userOpHash",
            ));
        }
        Err(Error::ExecutionFailed { receipt }) => {
            println!(
                "\nUserOp receipt (execution failed):\n{}",
                serde_json::to_string_pretty(&receipt.raw)?
            );
            return Err(anyhow!("user operation reverted on-chain"));
        }
        Err(e) => return Err(e).context("failed waiting for userOp receipt"),
    };

    println!(
        "\nEOA upgraded to a smart account and NFT minted. Transaction hash: {}",
        receipt
            .transaction_hash
            .map(encoding::fmt_h256)
            .unwrap_or_else(|| "<unknown>".to_string())
    );
    if let Some(block) = receipt.block_number {
        tracing::info!(block, gas_used = %receipt.actual_gas_used, "user operation included");
    }

    Ok(())
}

fn load_or_generate_delegator(pk: Option<String>, chain_id: u64) -> Result<LocalWallet> {
    if let Some(pk) = pk {
        let wallet = LocalWallet::from_str(&pk).context("invalid delegator private key")?;
        return Ok(wallet.with_chain_id(chain_id));
    }
    generate_random_wallet(chain_id)
}

fn generate_random_wallet(chain_id: u64) -> Result<LocalWallet> {
    let mut rng = OsRng;
    // Very low probability of invalid key; loop until LocalWallet accepts.
    for _ in 0..64 {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        if bytes.iter().all(|b| *b == 0) {
            continue;
        }
        let pk_hex = format!("0x{}", hex::encode(bytes));
        if let Ok(wallet) = LocalWallet::from_str(&pk_hex) {
            return Ok(wallet.with_chain_id(chain_id));
        }
    }
    Err(anyhow!(
        "failed to generate a valid random private key after multiple attempts"
    ))
}
