use soroban_sdk::{contracttype, Address, Env, I256};

use crate::{DataKey, TokenError};

/// One token in 18-decimal fixed point. Prices and credits_per_token use the
/// same scale, so one token always equals one common unit of reserve value.
pub const UNIT: i128 = 1_000_000_000_000_000_000;

// Per-account entries live in persistent storage and are bumped on access.
pub const CREDITS_TTL_THRESHOLD: u32 = 17_280; // ~1 day at 5s/ledger
pub const CREDITS_TTL_EXTEND_TO: u32 = 518_400; // ~30 days

/// Allowance entry, kept in temporary storage so it expires with its ledger.
#[contracttype]
#[derive(Clone)]
pub struct AllowanceKey {
    pub from: Address,
    pub spender: Address,
}

#[contracttype]
#[derive(Clone)]
pub struct AllowanceValue {
    pub amount: i128,
    pub expiration_ledger: u32,
}

// ─── Fixed-point helpers ────────────────────────────────────────

/// a * b / denom through 256-bit intermediates, truncating toward zero.
/// Truncation keeps rounding dust with the reserve, never the holder.
pub fn mul_div(env: &Env, a: i128, b: i128, denom: i128) -> i128 {
    let num = I256::from_i128(env, a).mul(&I256::from_i128(env, b));
    num.div(&I256::from_i128(env, denom))
        .to_i128()
        .expect("mul_div overflow")
}

/// a * b / denom rounding up. Used for the credits rate so that balances
/// derived from it never sum above the measured backing.
pub fn mul_div_ceil(env: &Env, a: i128, b: i128, denom: i128) -> i128 {
    let num = I256::from_i128(env, a).mul(&I256::from_i128(env, b));
    let d = I256::from_i128(env, denom);
    num.add(&d.sub(&I256::from_i128(env, 1)))
        .div(&d)
        .to_i128()
        .expect("mul_div overflow")
}

pub fn to_credits(env: &Env, amount: i128) -> i128 {
    mul_div(env, amount, credits_per_token(env), UNIT)
}

pub fn from_credits(env: &Env, credits: i128) -> i128 {
    mul_div(env, credits, UNIT, credits_per_token(env))
}

// ─── Global state ───────────────────────────────────────────────

pub fn total_credits(env: &Env) -> i128 {
    env.storage()
        .instance()
        .get(&DataKey::TotalCredits)
        .unwrap_or(0)
}

pub fn set_total_credits(env: &Env, credits: i128) {
    env.storage().instance().set(&DataKey::TotalCredits, &credits);
}

pub fn credits_per_token(env: &Env) -> i128 {
    env.storage()
        .instance()
        .get(&DataKey::CreditsPerToken)
        .unwrap_or(UNIT)
}

pub fn set_credits_per_token(env: &Env, rate: i128) {
    env.storage()
        .instance()
        .set(&DataKey::CreditsPerToken, &rate);
}

pub fn non_rebasing_supply(env: &Env) -> i128 {
    env.storage()
        .instance()
        .get(&DataKey::NonRebasingSupply)
        .unwrap_or(0)
}

pub fn set_non_rebasing_supply(env: &Env, supply: i128) {
    env.storage()
        .instance()
        .set(&DataKey::NonRebasingSupply, &supply);
}

/// Rebasing supply plus the directly-tracked opted-out supply.
pub fn total_supply(env: &Env) -> i128 {
    non_rebasing_supply(env) + from_credits(env, total_credits(env))
}

// ─── Per-account state ──────────────────────────────────────────

pub fn credits_of(env: &Env, account: &Address) -> i128 {
    let key = DataKey::Credits(account.clone());
    match env.storage().persistent().get::<_, i128>(&key) {
        Some(credits) => {
            env.storage().persistent().extend_ttl(
                &key,
                CREDITS_TTL_THRESHOLD,
                CREDITS_TTL_EXTEND_TO,
            );
            credits
        }
        None => 0,
    }
}

fn set_credits(env: &Env, account: &Address, credits: i128) {
    let key = DataKey::Credits(account.clone());
    env.storage().persistent().set(&key, &credits);
    env.storage()
        .persistent()
        .extend_ttl(&key, CREDITS_TTL_THRESHOLD, CREDITS_TTL_EXTEND_TO);
}

pub fn fixed_balance_of(env: &Env, account: &Address) -> i128 {
    let key = DataKey::FixedBalance(account.clone());
    match env.storage().persistent().get::<_, i128>(&key) {
        Some(amount) => {
            env.storage().persistent().extend_ttl(
                &key,
                CREDITS_TTL_THRESHOLD,
                CREDITS_TTL_EXTEND_TO,
            );
            amount
        }
        None => 0,
    }
}

fn set_fixed_balance(env: &Env, account: &Address, amount: i128) {
    let key = DataKey::FixedBalance(account.clone());
    env.storage().persistent().set(&key, &amount);
    env.storage()
        .persistent()
        .extend_ttl(&key, CREDITS_TTL_THRESHOLD, CREDITS_TTL_EXTEND_TO);
}

pub fn is_opted_out(env: &Env, account: &Address) -> bool {
    env.storage()
        .persistent()
        .get(&DataKey::OptOut(account.clone()))
        .unwrap_or(false)
}

pub fn balance_of(env: &Env, account: &Address) -> i128 {
    if is_opted_out(env, account) {
        fixed_balance_of(env, account)
    } else {
        from_credits(env, credits_of(env, account))
    }
}

// ─── Value movement ─────────────────────────────────────────────

/// Add `amount` of displayed balance to an account. Rebasing accounts gain
/// credits at the current rate; opted-out accounts are tracked directly.
pub fn credit(env: &Env, account: &Address, amount: i128) {
    if is_opted_out(env, account) {
        set_fixed_balance(env, account, fixed_balance_of(env, account) + amount);
        set_non_rebasing_supply(env, non_rebasing_supply(env) + amount);
    } else {
        let credits = to_credits(env, amount);
        set_credits(env, account, credits_of(env, account) + credits);
        set_total_credits(env, total_credits(env) + credits);
    }
}

/// Remove `amount` of displayed balance from an account. Residual credits
/// that no longer amount to a whole displayed unit are zeroed out.
pub fn debit(env: &Env, account: &Address, amount: i128) -> Result<(), TokenError> {
    if is_opted_out(env, account) {
        let held = fixed_balance_of(env, account);
        if held < amount {
            return Err(TokenError::InsufficientBalance);
        }
        set_fixed_balance(env, account, held - amount);
        set_non_rebasing_supply(env, non_rebasing_supply(env) - amount);
        return Ok(());
    }

    let held = credits_of(env, account);
    let balance = from_credits(env, held);
    if balance < amount {
        return Err(TokenError::InsufficientBalance);
    }
    // Debiting the entire displayed balance destroys all credits, so no
    // residual dust below one displayed unit is left stranded. Partial
    // debits round the burned credits up so the holder never keeps more
    // than the remainder.
    let burned = if amount == balance {
        held
    } else {
        mul_div_ceil(env, amount, credits_per_token(env), UNIT)
    };
    set_credits(env, account, held - burned);
    set_total_credits(env, total_credits(env) - burned);
    Ok(())
}

// ─── Rebase opt-out / opt-in ────────────────────────────────────

/// Freeze the account's balance at its current displayed amount and move it
/// into the directly-tracked supply.
pub fn opt_out(env: &Env, account: &Address) -> Result<i128, TokenError> {
    if is_opted_out(env, account) {
        return Err(TokenError::AccountNotRebasing);
    }
    let credits = credits_of(env, account);
    let balance = from_credits(env, credits);
    set_total_credits(env, total_credits(env) - credits);
    set_credits(env, account, 0);
    set_fixed_balance(env, account, balance);
    set_non_rebasing_supply(env, non_rebasing_supply(env) + balance);
    env.storage()
        .persistent()
        .set(&DataKey::OptOut(account.clone()), &true);
    Ok(balance)
}

/// Re-enter the credits scheme at the current rate.
pub fn opt_in(env: &Env, account: &Address) -> Result<i128, TokenError> {
    if !is_opted_out(env, account) {
        return Err(TokenError::AccountAlreadyRebasing);
    }
    let balance = fixed_balance_of(env, account);
    let credits = to_credits(env, balance);
    set_fixed_balance(env, account, 0);
    set_non_rebasing_supply(env, non_rebasing_supply(env) - balance);
    set_credits(env, account, credits_of(env, account) + credits);
    set_total_credits(env, total_credits(env) + credits);
    env.storage()
        .persistent()
        .set(&DataKey::OptOut(account.clone()), &false);
    Ok(balance)
}

// ─── Allowances ─────────────────────────────────────────────────

pub fn allowance(env: &Env, from: &Address, spender: &Address) -> i128 {
    let key = DataKey::Allowance(AllowanceKey {
        from: from.clone(),
        spender: spender.clone(),
    });
    match env.storage().temporary().get::<_, AllowanceValue>(&key) {
        Some(entry) if entry.expiration_ledger >= env.ledger().sequence() => entry.amount,
        _ => 0,
    }
}

pub fn set_allowance(
    env: &Env,
    from: &Address,
    spender: &Address,
    amount: i128,
    expiration_ledger: u32,
) -> Result<(), TokenError> {
    if amount > 0 && expiration_ledger < env.ledger().sequence() {
        return Err(TokenError::AllowanceExpired);
    }
    let key = DataKey::Allowance(AllowanceKey {
        from: from.clone(),
        spender: spender.clone(),
    });
    env.storage().temporary().set(
        &key,
        &AllowanceValue {
            amount,
            expiration_ledger,
        },
    );
    if amount > 0 {
        let live_for = expiration_ledger.saturating_sub(env.ledger().sequence());
        env.storage().temporary().extend_ttl(&key, live_for, live_for);
    }
    Ok(())
}

pub fn spend_allowance(
    env: &Env,
    from: &Address,
    spender: &Address,
    amount: i128,
) -> Result<(), TokenError> {
    let key = DataKey::Allowance(AllowanceKey {
        from: from.clone(),
        spender: spender.clone(),
    });
    let entry: AllowanceValue = env
        .storage()
        .temporary()
        .get(&key)
        .ok_or(TokenError::InsufficientAllowance)?;
    if entry.expiration_ledger < env.ledger().sequence() || entry.amount < amount {
        return Err(TokenError::InsufficientAllowance);
    }
    env.storage().temporary().set(
        &key,
        &AllowanceValue {
            amount: entry.amount - amount,
            expiration_ledger: entry.expiration_ledger,
        },
    );
    Ok(())
}
