//! Order history command.
//!
//! # Usage
//!
//! ```bash
//! aztec-cli orders --user 2b8f0c3e-...
//! ```

use aztec_core::UserId;
use aztec_storefront::remote::{RemoteError, RemoteService};

/// Print a user's orders with their items.
///
/// # Errors
///
/// Returns `RemoteError` if the orders cannot be fetched.
pub async fn history(remote: &impl RemoteService, user: &str) -> Result<(), RemoteError> {
    let user_id = UserId::new(user);
    let orders = remote.get_orders(&user_id).await?;
    tracing::info!(count = orders.len(), "Fetched order history");

    #[allow(clippy::print_stdout)]
    {
        println!("Orders of {user_id}:");
        if orders.is_empty() {
            println!("  (none)");
        }
        for order in &orders {
            println!(
                "  {}  {:<10} {:>10}  {} item(s)  {}",
                order.created_at.format("%Y-%m-%d %H:%M"),
                order.status.to_string(),
                order.total_amount.to_string(),
                order.item_count(),
                order.id
            );
            for item in &order.items {
                println!(
                    "      {:<28} {:>4} x {}",
                    item.product_id.as_str(),
                    item.quantity,
                    item.price
                );
            }
        }
    }
    Ok(())
}
