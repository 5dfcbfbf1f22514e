#![no_std]

use soroban_sdk::{
    contract, contractclient, contracterror, contractimpl, contracttype, token::TokenClient,
    Address, BytesN, Env, Symbol, Vec, I256,
};
use stellar_access::ownable::{self, Ownable};
use stellar_contract_utils::pausable;
use stellar_macros::only_owner;


/// One whole token / one unit of value in 18-decimal fixed point. Oracle
/// prices use the same scale with nominal 1.0 = 10^18.
pub const UNIT: i128 = 1_000_000_000_000_000_000;

const MAX_DECIMALS: u32 = 18;
const TOTAL_WEIGHT: u32 = 100;

// TTL constants: extend instance storage proactively to prevent archival
const TTL_THRESHOLD: u32 = 17_280; // ~1 day at 5s/ledger
const TTL_EXTEND_TO: u32 = 518_400; // ~30 days

const ASSET_TTL_THRESHOLD: u32 = 17_280;
const ASSET_TTL_EXTEND_TO: u32 = 518_400;

// ─── Storage Keys ────────────────────────────────────────────────

#[contracttype]
pub enum DataKey {
    Token,
    Oracle,
    AssetList,
    StrategyList,
    RebasePaused,
    ReentrancyGuard,
    Asset(Address),
    Strategy(Address),
}

// ─── Errors ──────────────────────────────────────────────────────

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum VaultError {
    UnsupportedAsset = 1,
    AssetAlreadySupported = 2,
    AssetDeprecated = 3,
    InvalidDecimals = 4,
    DepositsPaused = 5,
    RebasePaused = 6,
    InsufficientBalance = 7,
    InsufficientLiquidity = 8,
    OraclePriceMissing = 9,
    AllocationOverflow = 10,
    StrategyNotRegistered = 11,
    StrategyAlreadyAdded = 12,
    InvalidAmount = 13,
    ReentrantCall = 14,
}

// ─── External interfaces ─────────────────────────────────────────

/// Price oracle collaborator. Returns the asset's current price in the
/// common 18-decimal unit; a non-positive value means no price is set.
#[contractclient(name = "OracleClient")]
pub trait PriceOracle {
    fn price(env: Env, asset: Address) -> i128;
}

/// Yield venue adapter. All mutating calls are gated to this vault on the
/// strategy side.
#[contractclient(name = "StrategyClient")]
pub trait YieldStrategy {
    fn deposit(env: Env, asset: Address, amount: i128);
    fn withdraw(env: Env, asset: Address, amount: i128) -> i128;
    fn check_balance(env: Env, asset: Address) -> i128;
    fn collect_reward_token(env: Env, to: Address) -> i128;
}

/// The rebasing ledger surface the vault drives on the reserve token.
#[contractclient(name = "LedgerClient")]
pub trait RebasingLedger {
    fn balance(env: Env, id: Address) -> i128;
    fn credit_account(env: Env, to: Address, value: i128);
    fn debit_account(env: Env, from: Address, value: i128);
    fn change_supply(env: Env, new_total_value: i128);
}

// ─── Registry types ──────────────────────────────────────────────

#[contracttype]
#[derive(Clone)]
pub struct AssetConfig {
    /// Native decimal precision, at most 18.
    pub decimals: u32,
    /// Deprecated assets accept no new deposits but stay redeemable and
    /// counted in valuation until fully withdrawn.
    pub deprecated: bool,
    /// Bound strategy, if any. Deposits are routed to it per its weight.
    pub strategy: Option<Address>,
}

// ─── Contract ────────────────────────────────────────────────────

/// Multi-collateral reserve controller.
///
/// Accepts deposits of supported stable assets of differing precision,
/// prices them through the oracle into a common 18-decimal unit, mints the
/// reserve token against them, and periodically resynchronizes the token
/// supply to the reserve's measured value.
#[contract]
pub struct Vault;

// ─── Helpers ─────────────────────────────────────────────────────

fn token_address(env: &Env) -> Address {
    env.storage()
        .instance()
        .get(&DataKey::Token)
        .expect("Token not set")
}

fn oracle_address(env: &Env) -> Address {
    env.storage()
        .instance()
        .get(&DataKey::Oracle)
        .expect("Oracle not set")
}

fn asset_list(env: &Env) -> Vec<Address> {
    env.storage()
        .instance()
        .get(&DataKey::AssetList)
        .unwrap_or(Vec::new(env))
}

fn strategy_list(env: &Env) -> Vec<Address> {
    env.storage()
        .instance()
        .get(&DataKey::StrategyList)
        .unwrap_or(Vec::new(env))
}

fn asset_config(env: &Env, asset: &Address) -> Result<AssetConfig, VaultError> {
    let key = DataKey::Asset(asset.clone());
    let cfg: AssetConfig = env
        .storage()
        .persistent()
        .get(&key)
        .ok_or(VaultError::UnsupportedAsset)?;
    env.storage()
        .persistent()
        .extend_ttl(&key, ASSET_TTL_THRESHOLD, ASSET_TTL_EXTEND_TO);
    Ok(cfg)
}

fn set_asset_config(env: &Env, asset: &Address, cfg: &AssetConfig) {
    let key = DataKey::Asset(asset.clone());
    env.storage().persistent().set(&key, cfg);
    env.storage()
        .persistent()
        .extend_ttl(&key, ASSET_TTL_THRESHOLD, ASSET_TTL_EXTEND_TO);
}

fn strategy_weight_of(env: &Env, strategy: &Address) -> Option<u32> {
    env.storage()
        .persistent()
        .get(&DataKey::Strategy(strategy.clone()))
}

/// Sum of allocation weights across registered strategies, with `except`
/// replaced so weight updates can be validated against the 100 bound.
fn total_weight_with(env: &Env, except: &Address, weight: u32) -> u32 {
    let mut total = weight;
    for strategy in strategy_list(env).iter() {
        if &strategy != except {
            total = total.saturating_add(strategy_weight_of(env, &strategy).unwrap_or(0));
        }
    }
    total
}

/// 10^(18 - decimals); multiplying a native quantity by this yields the
/// 18-decimal representation without losing precision.
fn scale_factor(decimals: u32) -> i128 {
    10i128.pow(MAX_DECIMALS - decimals)
}

/// a * b / denom through 256-bit intermediates, truncating toward zero.
fn mul_div(env: &Env, a: i128, b: i128, denom: i128) -> i128 {
    let num = I256::from_i128(env, a).mul(&I256::from_i128(env, b));
    num.div(&I256::from_i128(env, denom))
        .to_i128()
        .expect("mul_div overflow")
}

fn price_of(env: &Env, asset: &Address) -> Result<i128, VaultError> {
    let price = OracleClient::new(env, &oracle_address(env)).price(asset);
    if price <= 0 {
        return Err(VaultError::OraclePriceMissing);
    }
    Ok(price)
}

// External collaborators could in principle re-enter through a malicious
// asset or strategy contract; the guard makes that a hard failure.
fn guard_enter(env: &Env) -> Result<(), VaultError> {
    let entered: bool = env
        .storage()
        .instance()
        .get(&DataKey::ReentrancyGuard)
        .unwrap_or(false);
    if entered {
        return Err(VaultError::ReentrantCall);
    }
    env.storage().instance().set(&DataKey::ReentrancyGuard, &true);
    Ok(())
}

fn guard_exit(env: &Env) {
    env.storage()
        .instance()
        .set(&DataKey::ReentrancyGuard, &false);
}

// ─── Implementation ──────────────────────────────────────────────

#[contractimpl]
impl Vault {
    pub fn initialize(env: Env, owner: Address, token: Address, oracle: Address) {
        ownable::set_owner(&env, &owner);
        env.storage().instance().set(&DataKey::Token, &token);
        env.storage().instance().set(&DataKey::Oracle, &oracle);
        env.storage()
            .instance()
            .set(&DataKey::RebasePaused, &false);

        env.events()
            .publish((Symbol::new(&env, "initialized"),), (token, oracle));
    }

    // ─── Asset registry ──────────────────────────────────────────

    /// Register an asset for deposits. An asset can only be supported once.
    #[only_owner]
    pub fn support_asset(env: Env, asset: Address, decimals: u32) -> Result<(), VaultError> {
        if decimals > MAX_DECIMALS {
            return Err(VaultError::InvalidDecimals);
        }
        if env
            .storage()
            .persistent()
            .has(&DataKey::Asset(asset.clone()))
        {
            return Err(VaultError::AssetAlreadySupported);
        }

        set_asset_config(
            &env,
            &asset,
            &AssetConfig {
                decimals,
                deprecated: false,
                strategy: None,
            },
        );
        let mut assets = asset_list(&env);
        assets.push_back(asset.clone());
        env.storage().instance().set(&DataKey::AssetList, &assets);

        env.events()
            .publish((Symbol::new(&env, "asset_supported"),), (asset, decimals));
        Ok(())
    }

    /// Stop accepting deposits of an asset. Holdings remain redeemable and
    /// keep counting toward the reserve's value.
    #[only_owner]
    pub fn deprecate_asset(env: Env, asset: Address) -> Result<(), VaultError> {
        let mut cfg = asset_config(&env, &asset)?;
        cfg.deprecated = true;
        set_asset_config(&env, &asset, &cfg);

        env.events()
            .publish((Symbol::new(&env, "asset_deprecated"),), asset);
        Ok(())
    }

    /// Register a yield strategy with an allocation weight. Total weight
    /// across strategies may not exceed 100.
    #[only_owner]
    pub fn add_strategy(env: Env, strategy: Address, weight: u32) -> Result<(), VaultError> {
        if strategy_weight_of(&env, &strategy).is_some() {
            return Err(VaultError::StrategyAlreadyAdded);
        }
        if total_weight_with(&env, &strategy, weight) > TOTAL_WEIGHT {
            return Err(VaultError::AllocationOverflow);
        }

        env.storage()
            .persistent()
            .set(&DataKey::Strategy(strategy.clone()), &weight);
        let mut strategies = strategy_list(&env);
        strategies.push_back(strategy.clone());
        env.storage()
            .instance()
            .set(&DataKey::StrategyList, &strategies);

        env.events()
            .publish((Symbol::new(&env, "strategy_added"),), (strategy, weight));
        Ok(())
    }

    #[only_owner]
    pub fn set_strategy_weight(env: Env, strategy: Address, weight: u32) -> Result<(), VaultError> {
        if strategy_weight_of(&env, &strategy).is_none() {
            return Err(VaultError::StrategyNotRegistered);
        }
        if total_weight_with(&env, &strategy, weight) > TOTAL_WEIGHT {
            return Err(VaultError::AllocationOverflow);
        }
        env.storage()
            .persistent()
            .set(&DataKey::Strategy(strategy.clone()), &weight);

        env.events()
            .publish((Symbol::new(&env, "weight_changed"),), (strategy, weight));
        Ok(())
    }

    /// Bind a supported asset to a registered strategy. Future deposits of
    /// the asset are routed there per the strategy's weight.
    #[only_owner]
    pub fn set_asset_strategy(env: Env, asset: Address, strategy: Address) -> Result<(), VaultError> {
        if strategy_weight_of(&env, &strategy).is_none() {
            return Err(VaultError::StrategyNotRegistered);
        }
        let mut cfg = asset_config(&env, &asset)?;
        cfg.strategy = Some(strategy.clone());
        set_asset_config(&env, &asset, &cfg);

        env.events()
            .publish((Symbol::new(&env, "asset_bound"),), (asset, strategy));
        Ok(())
    }

    // ─── Valuation ───────────────────────────────────────────────

    /// Total reserve value in the common 18-decimal unit: idle plus
    /// strategy-held quantities of every supported asset, priced through
    /// the oracle. Pure read; fails if any supported asset has no price.
    pub fn total_value(env: Env) -> Result<i128, VaultError> {
        Self::compute_total_value(&env)
    }

    fn compute_total_value(env: &Env) -> Result<i128, VaultError> {
        let vault = env.current_contract_address();
        let mut total: i128 = 0;
        for asset in asset_list(env).iter() {
            let cfg = asset_config(env, &asset)?;
            let mut quantity = TokenClient::new(env, &asset).balance(&vault);
            if let Some(strategy) = &cfg.strategy {
                quantity += StrategyClient::new(env, strategy).check_balance(&asset);
            }
            let price = price_of(env, &asset)?;
            total += mul_div(env, quantity * scale_factor(cfg.decimals), price, UNIT);
        }
        Ok(total)
    }

    // ─── Mint / redeem ───────────────────────────────────────────

    /// Deposit `amount` of `asset` and mint its oracle-priced value of the
    /// reserve token to the caller at the current credits rate.
    pub fn mint(env: Env, caller: Address, asset: Address, amount: i128) -> Result<(), VaultError> {
        caller.require_auth();
        guard_enter(&env)?;
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        if amount <= 0 {
            return Err(VaultError::InvalidAmount);
        }
        if pausable::paused(&env) {
            return Err(VaultError::DepositsPaused);
        }
        let cfg = asset_config(&env, &asset)?;
        if cfg.deprecated {
            return Err(VaultError::AssetDeprecated);
        }

        // Price first: a missing price must fail the deposit outright.
        let price = price_of(&env, &asset)?;
        let value = mul_div(&env, amount * scale_factor(cfg.decimals), price, UNIT);
        if value == 0 {
            return Err(VaultError::InvalidAmount);
        }

        let vault = env.current_contract_address();
        TokenClient::new(&env, &asset).transfer(&caller, &vault, &amount);
        LedgerClient::new(&env, &token_address(&env)).credit_account(&caller, &value);

        // Route to the bound strategy last, after all bookkeeping.
        if let Some(strategy) = &cfg.strategy {
            let weight = strategy_weight_of(&env, strategy).unwrap_or(0);
            let routed = amount * weight as i128 / TOTAL_WEIGHT as i128;
            if routed > 0 {
                TokenClient::new(&env, &asset).transfer(&vault, strategy, &routed);
                StrategyClient::new(&env, strategy).deposit(&asset, &routed);
            }
        }

        env.events()
            .publish((Symbol::new(&env, "mint"),), (caller, asset, amount, value));
        guard_exit(&env);
        Ok(())
    }

    /// Burn `amount` of the reserve token and pay out the equivalent
    /// quantity of `asset`, pulling from the bound strategy if the idle
    /// reserve cannot cover it. Single-asset only: if idle plus strategy
    /// holdings fall short, the whole redemption fails.
    pub fn redeem(env: Env, caller: Address, asset: Address, amount: i128) -> Result<(), VaultError> {
        caller.require_auth();
        guard_enter(&env)?;
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        Self::execute_redeem(&env, &caller, &asset, amount)?;
        guard_exit(&env);
        Ok(())
    }

    /// Redeem the caller's entire balance in `asset`.
    pub fn redeem_all(env: Env, caller: Address, asset: Address) -> Result<(), VaultError> {
        caller.require_auth();
        guard_enter(&env)?;
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        let balance = LedgerClient::new(&env, &token_address(&env)).balance(&caller);
        Self::execute_redeem(&env, &caller, &asset, balance)?;
        guard_exit(&env);
        Ok(())
    }

    fn execute_redeem(
        env: &Env,
        caller: &Address,
        asset: &Address,
        amount: i128,
    ) -> Result<(), VaultError> {
        if amount <= 0 {
            return Err(VaultError::InvalidAmount);
        }
        // Deprecated assets stay redeemable until drained.
        let cfg = asset_config(env, asset)?;

        let token = LedgerClient::new(env, &token_address(env));
        if token.balance(caller) < amount {
            return Err(VaultError::InsufficientBalance);
        }

        // Reverse-normalize, truncating: redemption dust stays in reserve.
        let native = amount / scale_factor(cfg.decimals);
        if native == 0 {
            return Err(VaultError::InvalidAmount);
        }

        let vault = env.current_contract_address();
        let asset_client = TokenClient::new(env, asset);
        let idle = asset_client.balance(&vault);
        let mut available = idle;
        if let Some(strategy) = &cfg.strategy {
            available += StrategyClient::new(env, strategy).check_balance(asset);
        }
        if available < native {
            return Err(VaultError::InsufficientLiquidity);
        }

        // Burn before moving any asset out.
        token.debit_account(caller, &amount);

        if idle < native {
            // Covered above, so the bound strategy must exist here.
            let strategy = cfg.strategy.as_ref().expect("no strategy bound");
            StrategyClient::new(env, strategy).withdraw(asset, &(native - idle));
        }
        asset_client.transfer(&vault, caller, &native);

        env.events().publish(
            (Symbol::new(env, "redeem"),),
            (caller.clone(), asset.clone(), amount, native),
        );
        Ok(())
    }

    // ─── Rebase ──────────────────────────────────────────────────

    /// Resynchronize the token supply to the reserve's measured value.
    /// Governor-only; the ledger itself enforces that a value decrease
    /// leaves every balance untouched.
    #[only_owner]
    pub fn rebase(env: Env) -> Result<(), VaultError> {
        if Self::rebase_paused(env.clone()) {
            return Err(VaultError::RebasePaused);
        }
        guard_enter(&env)?;
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        let value = Self::compute_total_value(&env)?;
        LedgerClient::new(&env, &token_address(&env)).change_supply(&value);

        env.events().publish((Symbol::new(&env, "rebase"),), value);
        guard_exit(&env);
        Ok(())
    }

    // ─── Pause controls ──────────────────────────────────────────

    #[only_owner]
    pub fn pause_deposits(env: Env) {
        pausable::pause(&env);
        env.events()
            .publish((Symbol::new(&env, "deposits_paused"),), true);
    }

    #[only_owner]
    pub fn unpause_deposits(env: Env) {
        pausable::unpause(&env);
        env.events()
            .publish((Symbol::new(&env, "deposits_paused"),), false);
    }

    pub fn deposit_paused(env: Env) -> bool {
        pausable::paused(&env)
    }

    #[only_owner]
    pub fn set_rebase_paused(env: Env, paused: bool) {
        env.storage()
            .instance()
            .set(&DataKey::RebasePaused, &paused);
        env.events()
            .publish((Symbol::new(&env, "rebase_paused"),), paused);
    }

    pub fn rebase_paused(env: Env) -> bool {
        env.storage()
            .instance()
            .get(&DataKey::RebasePaused)
            .unwrap_or(false)
    }

    // ─── Strategy maintenance ────────────────────────────────────

    /// Pull accumulated reward tokens from a strategy. The strategy only
    /// accepts this call from the vault.
    #[only_owner]
    pub fn collect_reward_token(env: Env, strategy: Address, to: Address) -> Result<i128, VaultError> {
        if strategy_weight_of(&env, &strategy).is_none() {
            return Err(VaultError::StrategyNotRegistered);
        }
        let amount = StrategyClient::new(&env, &strategy).collect_reward_token(&to);
        env.events()
            .publish((Symbol::new(&env, "rewards_collected"),), (strategy, amount));
        Ok(amount)
    }

    #[only_owner]
    pub fn set_oracle(env: Env, oracle: Address) {
        env.storage().instance().set(&DataKey::Oracle, &oracle);
        env.events()
            .publish((Symbol::new(&env, "oracle_changed"),), oracle);
    }

    // ─── Views ───────────────────────────────────────────────────

    pub fn assets(env: Env) -> Vec<Address> {
        asset_list(&env)
    }

    pub fn asset_config(env: Env, asset: Address) -> Result<AssetConfig, VaultError> {
        asset_config(&env, &asset)
    }

    pub fn strategies(env: Env) -> Vec<Address> {
        strategy_list(&env)
    }

    pub fn strategy_weight(env: Env, strategy: Address) -> Result<u32, VaultError> {
        strategy_weight_of(&env, &strategy).ok_or(VaultError::StrategyNotRegistered)
    }

    pub fn oracle(env: Env) -> Address {
        oracle_address(&env)
    }

    pub fn token(env: Env) -> Address {
        token_address(&env)
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
impl Ownable for Vault {}
