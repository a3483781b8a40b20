use payloads::Amount;

use crate::helpers::{new_user, spawn_app};

#[tokio::test]
async fn deposit_then_withdraw_returns_to_original_balance() {
    let app = spawn_app();
    let user = new_user();

    app.engine.deposit(user, Amount(1000)).await.unwrap();
    app.engine.withdraw(user, Amount(400)).await.unwrap();
    let balance = app.engine.get_balance(user).await.unwrap();
    assert_eq!(balance.available, Amount(600));
    assert_eq!(balance.frozen, Amount::ZERO);

    let txs = app.engine.get_transactions(user, 100, 0).await.unwrap();
    assert_eq!(txs.len(), 2);
}

#[tokio::test]
async fn withdraw_more_than_available_fails() {
    let app = spawn_app();
    let user = new_user();

    app.engine.deposit(user, Amount(100)).await.unwrap();
    let err = app.engine.withdraw(user, Amount(500)).await.unwrap_err();
    assert!(matches!(err, engine::error::EngineError::InsufficientBalance));
}

#[tokio::test]
async fn deposit_rejects_non_positive_amount() {
    let app = spawn_app();
    let user = new_user();
    let err = app.engine.deposit(user, Amount(0)).await.unwrap_err();
    assert!(matches!(err, engine::error::EngineError::InvalidAmount));
}
