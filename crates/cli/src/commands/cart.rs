//! Cart commands.

use brickyard_client::{AppState, CartError, CartState};
use brickyard_core::ProductId;

use super::report;

/// Print the cart and its subtotal.
pub async fn show(app: &AppState) -> Result<(), CartError> {
    if app.session().current_user().is_none() {
        let err = CartError::Unauthenticated;
        report(app, err.toast());
        return Err(err);
    }
    app.cart()
        .refresh_cart()
        .await
        .inspect_err(|e| report(app, e.toast()))?;
    print_cart(&app.cart().snapshot());
    Ok(())
}

pub async fn add(app: &AppState, id: &ProductId, quantity: u32) -> Result<(), CartError> {
    app.cart()
        .add_item(id, quantity)
        .await
        .inspect_err(|e| report(app, e.toast()))?;
    print_cart(&app.cart().snapshot());
    Ok(())
}

pub async fn set(app: &AppState, id: &ProductId, quantity: u32) -> Result<(), CartError> {
    app.cart()
        .update_quantity(id, quantity)
        .await
        .inspect_err(|e| report(app, e.toast()))?;
    print_cart(&app.cart().snapshot());
    Ok(())
}

pub async fn remove(app: &AppState, id: &ProductId) -> Result<(), CartError> {
    app.cart()
        .remove_item(id)
        .await
        .inspect_err(|e| report(app, e.toast()))?;
    print_cart(&app.cart().snapshot());
    Ok(())
}

pub async fn clear(app: &AppState) -> Result<(), CartError> {
    app.cart()
        .clear()
        .await
        .inspect_err(|e| report(app, e.toast()))?;
    print_cart(&app.cart().snapshot());
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_cart(state: &CartState) {
    if state.lines.is_empty() {
        println!("Your cart is empty");
        return;
    }
    for line in &state.lines {
        println!(
            "{:>3} x {:<40} {:>10}",
            line.quantity,
            line.product.name,
            line.line_total().to_string()
        );
    }
    println!("{} items, subtotal {}", state.item_count(), state.subtotal());
}
