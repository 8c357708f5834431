//! Favorites commands.

use brickyard_client::{AppState, FavoritesError, FavoritesState};
use brickyard_core::ProductId;

use super::report;

/// Print the signed-in user's favorites.
pub async fn list(app: &AppState) -> Result<(), FavoritesError> {
    require_user(app)?;
    let favorites = app.favorites();
    favorites
        .refresh_favorites()
        .await
        .inspect_err(|e| report(app, e.toast()))?;
    print_favorites(&favorites.snapshot());
    Ok(())
}

pub async fn add(app: &AppState, id: &ProductId) -> Result<(), FavoritesError> {
    app.favorites()
        .add_favorite(id)
        .await
        .inspect_err(|e| report(app, e.toast()))?;
    print_favorites(&app.favorites().snapshot());
    Ok(())
}

pub async fn remove(app: &AppState, id: &ProductId) -> Result<(), FavoritesError> {
    app.favorites()
        .remove_favorite(id)
        .await
        .inspect_err(|e| report(app, e.toast()))?;
    print_favorites(&app.favorites().snapshot());
    Ok(())
}

/// Toggle `id`; loads the list first so the toggle acts on server state.
#[allow(clippy::print_stdout)]
pub async fn toggle(app: &AppState, id: &ProductId) -> Result<(), FavoritesError> {
    require_user(app)?;
    let favorites = app.favorites();
    favorites
        .refresh_favorites()
        .await
        .inspect_err(|e| report(app, e.toast()))?;
    let now_favorite = favorites
        .toggle_favorite(id)
        .await
        .inspect_err(|e| report(app, e.toast()))?;

    if now_favorite {
        println!("Added {id} to favorites");
    } else {
        println!("Removed {id} from favorites");
    }
    Ok(())
}

fn require_user(app: &AppState) -> Result<(), FavoritesError> {
    if app.session().current_user().is_none() {
        let err = FavoritesError::Unauthenticated;
        report(app, err.toast());
        return Err(err);
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_favorites(state: &FavoritesState) {
    if state.favorites.is_empty() {
        println!("No favorites yet");
        return;
    }
    for product in &state.favorites {
        let stock = if product.in_stock() {
            ""
        } else {
            "  (out of stock)"
        };
        println!(
            "{:<26} {:>10}  {}{stock}",
            product.id.as_str(),
            product.price.to_string(),
            product.name
        );
    }
}
