#![no_std]

use soroban_sdk::{
    contract, contractclient, contracterror, contractimpl, contracttype, token::TokenClient,
    Address, BytesN, Env, Symbol, Vec,
};
use stellar_access::ownable::{self, Ownable};
use stellar_macros::only_owner;

// TTL constants: extend instance storage proactively to prevent archival
const TTL_THRESHOLD: u32 = 17_280; // ~1 day at 5s/ledger
const TTL_EXTEND_TO: u32 = 518_400; // ~30 days

// ─── Storage Keys ────────────────────────────────────────────────

#[contracttype]
pub enum DataKey {
    Vault,
    Market,
    RewardToken,
    Assets,
}

// ─── Errors ──────────────────────────────────────────────────────

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum StrategyError {
    UnsupportedAsset = 1,
    AssetAlreadyRegistered = 2,
    InvalidAmount = 3,
}

// ─── Money-market venue interface ────────────────────────────────

/// The underlying yield venue. `supply` pulls the asset from the supplier
/// through the standing allowance established by `safe_approve_all_tokens`;
/// `redeem` pays the asset back out to the supplier.
#[contractclient(name = "MarketClient")]
pub trait MoneyMarket {
    fn supply(env: Env, from: Address, asset: Address, amount: i128);
    fn redeem(env: Env, to: Address, asset: Address, amount: i128);
    fn balance(env: Env, asset: Address, account: Address) -> i128;
    fn claim_reward(env: Env, to: Address) -> i128;
}

// ─── Contract ────────────────────────────────────────────────────

/// Money-market adapter between the reserve vault and one yield venue.
///
/// The vault routes idle collateral here; the adapter supplies it to the
/// venue and reports venue-held value back. Every mutating entry point is
/// gated to the vault; registry and allowance maintenance to the governor.
#[contract]
pub struct MarketStrategy;

// ─── Helpers ─────────────────────────────────────────────────────

fn require_vault(env: &Env) {
    let vault: Address = env
        .storage()
        .instance()
        .get(&DataKey::Vault)
        .expect("Vault not set");
    vault.require_auth();
}

fn market_address(env: &Env) -> Address {
    env.storage()
        .instance()
        .get(&DataKey::Market)
        .expect("Market not set")
}

fn asset_list(env: &Env) -> Vec<Address> {
    env.storage()
        .instance()
        .get(&DataKey::Assets)
        .unwrap_or(Vec::new(env))
}

fn require_registered(env: &Env, asset: &Address) -> Result<(), StrategyError> {
    if !asset_list(env).contains(asset) {
        return Err(StrategyError::UnsupportedAsset);
    }
    Ok(())
}

// ─── Implementation ──────────────────────────────────────────────

#[contractimpl]
impl MarketStrategy {
    pub fn initialize(env: Env, owner: Address, vault: Address, market: Address, reward_token: Address) {
        ownable::set_owner(&env, &owner);
        env.storage().instance().set(&DataKey::Vault, &vault);
        env.storage().instance().set(&DataKey::Market, &market);
        env.storage()
            .instance()
            .set(&DataKey::RewardToken, &reward_token);

        env.events()
            .publish((Symbol::new(&env, "initialized"),), (vault, market));
    }

    /// Supply vault-routed collateral to the venue. Vault-only.
    pub fn deposit(env: Env, asset: Address, amount: i128) -> Result<(), StrategyError> {
        require_vault(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        require_registered(&env, &asset)?;
        if amount <= 0 {
            return Err(StrategyError::InvalidAmount);
        }

        let this = env.current_contract_address();
        MarketClient::new(&env, &market_address(&env)).supply(&this, &asset, &amount);

        env.events()
            .publish((Symbol::new(&env, "deposit"),), (asset, amount));
        Ok(())
    }

    /// Redeem from the venue and return the asset to the vault. Vault-only.
    pub fn withdraw(env: Env, asset: Address, amount: i128) -> Result<i128, StrategyError> {
        require_vault(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        require_registered(&env, &asset)?;
        if amount <= 0 {
            return Err(StrategyError::InvalidAmount);
        }

        let this = env.current_contract_address();
        MarketClient::new(&env, &market_address(&env)).redeem(&this, &asset, &amount);

        let vault: Address = env
            .storage()
            .instance()
            .get(&DataKey::Vault)
            .expect("Vault not set");
        TokenClient::new(&env, &asset).transfer(&this, &vault, &amount);

        env.events()
            .publish((Symbol::new(&env, "withdraw"),), (asset, amount));
        Ok(amount)
    }

    /// Venue-reported holdings of `asset` credited to this adapter.
    pub fn check_balance(env: Env, asset: Address) -> i128 {
        let this = env.current_contract_address();
        MarketClient::new(&env, &market_address(&env)).balance(&asset, &this)
    }

    /// Claim venue rewards and push the accumulated reward-token balance to
    /// `to`. Only the vault may trigger this, never the venue or governor.
    pub fn collect_reward_token(env: Env, to: Address) -> i128 {
        require_vault(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        let this = env.current_contract_address();
        MarketClient::new(&env, &market_address(&env)).claim_reward(&this);

        let reward_token: Address = env
            .storage()
            .instance()
            .get(&DataKey::RewardToken)
            .expect("Reward token not set");
        let reward = TokenClient::new(&env, &reward_token);
        let amount = reward.balance(&this);
        if amount > 0 {
            reward.transfer(&this, &to, &amount);
        }

        env.events()
            .publish((Symbol::new(&env, "rewards_collected"),), (to, amount));
        amount
    }

    /// Register an asset this adapter may custody.
    #[only_owner]
    pub fn register_asset(env: Env, asset: Address) -> Result<(), StrategyError> {
        let mut assets = asset_list(&env);
        if assets.contains(&asset) {
            return Err(StrategyError::AssetAlreadyRegistered);
        }
        assets.push_back(asset.clone());
        env.storage().instance().set(&DataKey::Assets, &assets);

        env.events()
            .publish((Symbol::new(&env, "asset_registered"),), asset);
        Ok(())
    }

    /// Re-establish the venue's spending allowance for every registered
    /// asset. Deposits fail once the previous allowance expires.
    #[only_owner]
    pub fn safe_approve_all_tokens(env: Env) {
        let this = env.current_contract_address();
        let market = market_address(&env);
        let expiration = env.ledger().sequence() + TTL_EXTEND_TO;
        for asset in asset_list(&env).iter() {
            TokenClient::new(&env, &asset).approve(&this, &market, &i128::MAX, &expiration);
        }

        env.events()
            .publish((Symbol::new(&env, "allowances_renewed"),), market);
    }

    // ─── Views ───────────────────────────────────────────────────

    pub fn supports_asset(env: Env, asset: Address) -> bool {
        asset_list(&env).contains(&asset)
    }

    pub fn assets(env: Env) -> Vec<Address> {
        asset_list(&env)
    }

    pub fn vault(env: Env) -> Address {
        env.storage()
            .instance()
            .get(&DataKey::Vault)
            .expect("Vault not set")
    }

    pub fn market(env: Env) -> Address {
        market_address(&env)
    }

    /// Owner upgrades the contract WASM. Requires owner auth.
    #[only_owner]
    pub fn upgrade(env: Env, wasm_hash: BytesN<32>) {
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        env.deployer().update_current_contract_wasm(wasm_hash);
    }
}

// Ownable (2-step transfer); the owner is the protocol governor.
#[contractimpl]
impl Ownable for MarketStrategy {}
