//! Junction selection.
//!
//! Pure functions over the envelope; the only side effect is debug logging.

use tracing::debug;

use crate::junctions::model::{FromCondition, Junction, Selected, ToCondition};

/// Return the first junction whose `to` and `from` conditions both hold.
///
/// `None` means no junction applies and the message is not delivered.
pub fn select_junction<'a>(
    junctions: &'a [Junction],
    to: &[String],
    from: &str,
    ip: &str,
) -> Option<Selected<'a>> {
    for (index, junction) in junctions.iter().enumerate() {
        debug!(junction = %junction.id(index), "Checking junction");

        let to_match = to_matches(&junction.to, to);
        let from_match = from_matches(&junction.from, from, ip);

        debug!(to = to_match, from = from_match, "Junction results");

        if to_match && from_match {
            return Some(Selected { index, junction });
        }
    }
    None
}

/// Check the envelope recipients against a junction's `to` condition.
///
/// Comparison is exact: no case folding, no substring matching.
pub fn to_matches(condition: &ToCondition, recipients: &[String]) -> bool {
    if condition.emails.is_empty() {
        debug!("No 'to' condition, matches by default");
        return true;
    }

    let mut found = vec![false; condition.emails.len()];
    for (slot, wanted) in condition.emails.iter().enumerate() {
        for received in recipients {
            let matched = wanted == received;
            debug!(configured = %wanted, received = %received, matched, "Comparing 'to'");
            if !matched {
                continue;
            }
            // A one-character configured address short-circuits even with
            // require_all set. Existing configurations depend on it.
            if !condition.require_all || wanted.len() == 1 {
                debug!("Only one match required, 'to' matches");
                return true;
            }
            found[slot] = true;
        }
    }

    if let Some(missing) = found.iter().position(|hit| !hit) {
        debug!(
            email = %condition.emails[missing],
            "Required recipient not present, 'to' doesn't match"
        );
        return false;
    }

    debug!("All required recipients present, 'to' matches");
    true
}

/// Check the envelope sender and peer address against a junction's `from` condition.
pub fn from_matches(condition: &FromCondition, from: &str, ip: &str) -> bool {
    let email_match = match condition.email.as_deref() {
        None | Some("") => true,
        Some(wanted) => {
            let matched = wanted == from;
            debug!(configured = %wanted, received = %from, matched, "Comparing 'from' email");
            matched
        }
    };

    let ip_match = match condition.ip.as_deref() {
        None | Some("") => true,
        Some(wanted) => {
            let matched = wanted == ip;
            debug!(configured = %wanted, received = %ip, matched, "Comparing 'from' ip");
            matched
        }
    };

    email_match && ip_match
}
