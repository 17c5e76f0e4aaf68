//! Stream binding analysis.
//!
//! Walks the baskets referenced by a freshly compiled plan and turns them
//! into [`StreamBinding`]s. A basket unknown to the catalog is registered on
//! the fly. Window and stride start from the basket's own configuration and
//! the first column stands in for the basket in occupancy checks.
//!
//! Analysis has no effect on the transition table: on any failure the caller
//! simply never inserts the transition.

use crate::plan::{BasketCatalog, Direction, Plan};
use crate::transition::StreamBinding;
use cquery_core::{CoreError, CoreResult, TransitionKey};
use tracing::debug;

/// Derive the stream bindings of a plan
///
/// A basket referenced several times yields one binding; it is an input if
/// any reference reads it.
///
/// # Errors
///
/// Returns an analysis error if a basket cannot be registered, has no
/// columns, or more than `max_streams` distinct baskets are referenced
pub fn analyse(
    key: &TransitionKey,
    plan: &dyn Plan,
    catalog: &dyn BasketCatalog,
    max_streams: usize,
) -> CoreResult<Vec<StreamBinding>> {
    let mut bindings: Vec<StreamBinding> = Vec::new();

    for reference in plan.baskets() {
        if let Some(existing) = bindings.iter_mut().find(|b| b.basket == reference.basket) {
            if reference.direction == Direction::In {
                existing.direction = Direction::In;
            }
            continue;
        }

        if bindings.len() == max_streams {
            return Err(failure(key, format!("too many stream tables (limit {})", max_streams)));
        }

        let info = match catalog.basket(&reference.basket) {
            Some(info) => info,
            None => {
                debug!(basket = %reference.basket, transition = %key, "registering basket");
                catalog.register_basket(&reference.basket).map_err(|err| {
                    failure(key, format!("basket {} registration failed: {}", reference.basket, err))
                })?
            }
        };

        let column = info
            .columns
            .first()
            .cloned()
            .ok_or_else(|| failure(key, format!("basket {} has no columns", reference.basket)))?;

        bindings.push(StreamBinding {
            basket: reference.basket,
            column,
            direction: reference.direction,
            window: info.window,
            stride: info.stride,
        });
    }

    Ok(bindings)
}

fn failure(key: &TransitionKey, reason: String) -> CoreError {
    CoreError::Analysis {
        transition: key.to_string(),
        reason,
    }
}
