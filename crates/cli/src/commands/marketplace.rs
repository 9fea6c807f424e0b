//! Marketplace and ledger inspection commands.
//!
//! # Usage
//!
//! ```bash
//! # Every active listing
//! aztec-cli listings
//!
//! # One seller's active listings
//! aztec-cli listings --seller 2b8f0c3e-...
//!
//! # A user's inventory and listings
//! aztec-cli ledger --user 2b8f0c3e-...
//! ```

use aztec_core::UserId;
use aztec_storefront::models::ListingEntry;
use aztec_storefront::remote::{RemoteError, RemoteService};

/// Print active listings, optionally for one seller.
///
/// # Errors
///
/// Returns `RemoteError` if the listings cannot be fetched.
pub async fn listings(remote: &impl RemoteService, seller: Option<&str>) -> Result<(), RemoteError> {
    let mut listings = remote.get_all_active_listings().await?;
    if let Some(seller) = seller {
        listings.retain(|l| l.user_id.as_str() == seller);
    }
    listings.sort_by(|a, b| a.product_id.cmp(&b.product_id));

    tracing::info!(count = listings.len(), "Fetched active listings");
    print_listings(&listings);
    Ok(())
}

/// Print a user's inventory and listings.
///
/// # Errors
///
/// Returns `RemoteError` if either ledger cannot be fetched.
pub async fn ledger(remote: &impl RemoteService, user: &str) -> Result<(), RemoteError> {
    let user_id = UserId::new(user);
    let inventory = remote.get_inventory(&user_id).await?;
    let listings = remote.get_listings(&user_id).await?;

    #[allow(clippy::print_stdout)]
    {
        println!("Inventory of {user_id}:");
        if inventory.is_empty() {
            println!("  (empty)");
        }
        for entry in &inventory {
            println!("  {:<32} {:>6}", entry.product_id.as_str(), entry.quantity);
        }
        println!();
    }
    print_listings(&listings);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_listings(listings: &[ListingEntry]) {
    println!("Listings:");
    if listings.is_empty() {
        println!("  (none)");
    }
    for listing in listings {
        println!(
            "  {:<32} {:>6} @ {:>10}  {:<8} {}",
            listing.product_id.as_str(),
            listing.quantity,
            listing.price.to_string(),
            listing.status.to_string(),
            listing.user_id
        );
    }
}
