#![no_std]

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, panic_with_error,
    token::TokenInterface, Address, BytesN, Env, MuxedAddress, String, Symbol,
};
use stellar_access::ownable::{self, Ownable};
use stellar_macros::only_owner;

mod ledger;

pub use ledger::UNIT;
use ledger::AllowanceKey;

// TTL constants: extend instance storage proactively to prevent archival
const TTL_THRESHOLD: u32 = 17_280; // ~1 day at 5s/ledger
const TTL_EXTEND_TO: u32 = 518_400; // ~30 days

const DECIMALS: u32 = 18;

// ─── Storage Keys ────────────────────────────────────────────────

#[contracttype]
pub enum DataKey {
    Vault,
    TotalCredits,
    CreditsPerToken,
    NonRebasingSupply,
    Credits(Address),
    FixedBalance(Address),
    OptOut(Address),
    Allowance(AllowanceKey),
}

// ─── Errors ──────────────────────────────────────────────────────

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum TokenError {
    InsufficientBalance = 1,
    InsufficientAllowance = 2,
    InvalidAmount = 3,
    AllowanceExpired = 4,
    AccountNotRebasing = 5,
    AccountAlreadyRebasing = 6,
    SupplyPrecisionLoss = 7,
}

// ─── Contract ────────────────────────────────────────────────────

/// Elastic-supply accounting unit backed by the reserve vault.
///
/// Balances of rebasing holders are derived from fixed per-account credits
/// and a shared credits_per_token rate; a rebase moves only the rate, so the
/// whole supply scales without touching any account entry.
#[contract]
pub struct ReserveToken;

// ─── Helpers ─────────────────────────────────────────────────────

fn require_vault(env: &Env) {
    let vault: Address = env
        .storage()
        .instance()
        .get(&DataKey::Vault)
        .expect("Vault not set");
    vault.require_auth();
}

fn check_nonnegative(env: &Env, amount: i128) {
    if amount < 0 {
        panic_with_error!(env, TokenError::InvalidAmount);
    }
}

fn move_balance(env: &Env, from: &Address, to: &Address, amount: i128) {
    check_nonnegative(env, amount);
    if let Err(err) = ledger::debit(env, from, amount) {
        panic_with_error!(env, err);
    }
    ledger::credit(env, to, amount);
}

// ─── SEP-41 Token Interface ──────────────────────────────────────

#[contractimpl]
impl TokenInterface for ReserveToken {
    fn allowance(env: Env, from: Address, spender: Address) -> i128 {
        ledger::allowance(&env, &from, &spender)
    }

    fn approve(env: Env, from: Address, spender: Address, amount: i128, expiration_ledger: u32) {
        from.require_auth();
        check_nonnegative(&env, amount);
        if let Err(err) = ledger::set_allowance(&env, &from, &spender, amount, expiration_ledger) {
            panic_with_error!(&env, err);
        }
        env.events()
            .publish((Symbol::new(&env, "approve"),), (from, spender, amount));
    }

    fn balance(env: Env, id: Address) -> i128 {
        ledger::balance_of(&env, &id)
    }

    fn transfer(env: Env, from: Address, to: MuxedAddress, amount: i128) {
        from.require_auth();
        let to_addr = to.address();
        move_balance(&env, &from, &to_addr, amount);
        env.events()
            .publish((Symbol::new(&env, "transfer"),), (from, to_addr, amount));
    }

    fn transfer_from(env: Env, spender: Address, from: Address, to: Address, amount: i128) {
        spender.require_auth();
        check_nonnegative(&env, amount);
        if let Err(err) = ledger::spend_allowance(&env, &from, &spender, amount) {
            panic_with_error!(&env, err);
        }
        move_balance(&env, &from, &to, amount);
        env.events()
            .publish((Symbol::new(&env, "transfer"),), (from, to, amount));
    }

    fn burn(env: Env, from: Address, amount: i128) {
        from.require_auth();
        check_nonnegative(&env, amount);
        if let Err(err) = ledger::debit(&env, &from, amount) {
            panic_with_error!(&env, err);
        }
        env.events()
            .publish((Symbol::new(&env, "burn"),), (from, amount));
    }

    fn burn_from(env: Env, spender: Address, from: Address, amount: i128) {
        spender.require_auth();
        check_nonnegative(&env, amount);
        if let Err(err) = ledger::spend_allowance(&env, &from, &spender, amount) {
            panic_with_error!(&env, err);
        }
        if let Err(err) = ledger::debit(&env, &from, amount) {
            panic_with_error!(&env, err);
        }
        env.events()
            .publish((Symbol::new(&env, "burn"),), (from, amount));
    }

    fn decimals(_env: Env) -> u32 {
        DECIMALS
    }

    fn name(env: Env) -> String {
        String::from_str(&env, "Reserve Dollar")
    }

    fn symbol(env: Env) -> String {
        String::from_str(&env, "RUSD")
    }
}

// Ownable (2-step transfer); the owner is the protocol governor.
#[contractimpl]
impl Ownable for ReserveToken {}

// ─── Ledger Surface ──────────────────────────────────────────────

#[contractimpl]
impl ReserveToken {
    pub fn initialize(env: Env, owner: Address, vault: Address) {
        ownable::set_owner(&env, &owner);
        env.storage().instance().set(&DataKey::Vault, &vault);
        ledger::set_credits_per_token(&env, ledger::UNIT);
        ledger::set_total_credits(&env, 0);
        ledger::set_non_rebasing_supply(&env, 0);
    }

    pub fn total_supply(env: Env) -> i128 {
        ledger::total_supply(&env)
    }

    /// The account's fixed credits plus the shared conversion rate.
    /// Opted-out accounts report zero credits.
    pub fn credits_balance_of(env: Env, account: Address) -> (i128, i128) {
        (
            ledger::credits_of(&env, &account),
            ledger::credits_per_token(&env),
        )
    }

    pub fn credits_per_token(env: Env) -> i128 {
        ledger::credits_per_token(&env)
    }

    pub fn non_rebasing_supply(env: Env) -> i128 {
        ledger::non_rebasing_supply(&env)
    }

    pub fn rebasing_credits(env: Env) -> i128 {
        ledger::total_credits(&env)
    }

    pub fn vault(env: Env) -> Address {
        env.storage()
            .instance()
            .get(&DataKey::Vault)
            .expect("Vault not set")
    }

    /// Vault mints `value` worth of token at the current credits rate.
    pub fn credit_account(env: Env, to: Address, value: i128) -> Result<(), TokenError> {
        require_vault(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        if value <= 0 {
            return Err(TokenError::InvalidAmount);
        }
        ledger::credit(&env, &to, value);
        env.events()
            .publish((Symbol::new(&env, "mint"),), (to, value));
        Ok(())
    }

    /// Vault burns `value` worth of token on redemption.
    pub fn debit_account(env: Env, from: Address, value: i128) -> Result<(), TokenError> {
        require_vault(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        if value <= 0 {
            return Err(TokenError::InvalidAmount);
        }
        ledger::debit(&env, &from, value)?;
        env.events()
            .publish((Symbol::new(&env, "burn"),), (from, value));
        Ok(())
    }

    /// Resynchronize total supply to the reserve's measured value.
    ///
    /// Only the rebasing portion moves: the target is `new_total_value`
    /// minus the opted-out supply. A target at or below the current rebasing
    /// supply leaves every balance untouched, so a drop in reserve value is
    /// absorbed by the reserve instead of socialized onto holders.
    pub fn change_supply(env: Env, new_total_value: i128) -> Result<(), TokenError> {
        require_vault(&env);
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        if new_total_value < 0 {
            return Err(TokenError::InvalidAmount);
        }

        let total_credits = ledger::total_credits(&env);
        if total_credits == 0 {
            return Ok(());
        }
        let target = new_total_value - ledger::non_rebasing_supply(&env);
        let current = ledger::from_credits(&env, total_credits);
        if target <= current {
            return Ok(());
        }

        // Round the rate up: a higher rate means smaller derived balances,
        // so the ledger can only understate the backing, never overstate it.
        let rate = ledger::mul_div_ceil(&env, total_credits, ledger::UNIT, target);
        if rate == 0 {
            return Err(TokenError::SupplyPrecisionLoss);
        }
        ledger::set_credits_per_token(&env, rate);

        env.events().publish(
            (Symbol::new(&env, "rebase"),),
            (ledger::total_supply(&env), rate),
        );
        Ok(())
    }

    /// Holder leaves the rebasing scheme; balance is frozen at its current
    /// displayed amount and no longer moves with the shared rate.
    pub fn rebase_opt_out(env: Env, account: Address) -> Result<(), TokenError> {
        account.require_auth();
        let balance = ledger::opt_out(&env, &account)?;
        env.events()
            .publish((Symbol::new(&env, "opt_out"),), (account, balance));
        Ok(())
    }

    /// Holder rejoins the rebasing scheme at the current rate.
    pub fn rebase_opt_in(env: Env, account: Address) -> Result<(), TokenError> {
        account.require_auth();
        let balance = ledger::opt_in(&env, &account)?;
        env.events()
            .publish((Symbol::new(&env, "opt_in"),), (account, balance));
        Ok(())
    }

    pub fn is_non_rebasing(env: Env, account: Address) -> bool {
        ledger::is_opted_out(&env, &account)
    }

    #[only_owner]
    pub fn set_vault(env: Env, vault: Address) {
        env.storage().instance().set(&DataKey::Vault, &vault);
        env.events()
            .publish((Symbol::new(&env, "vault_changed"),), vault);
    }

    /// Owner upgrades the contract WASM. Requires owner auth.
    #[only_owner]
    pub fn upgrade(env: Env, wasm_hash: BytesN<32>) {
        env.storage().instance().extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);
        env.deployer().update_current_contract_wasm(wasm_hash);
    }
}
