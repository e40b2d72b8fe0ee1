//! UPI deep-link construction.
//!
//! Pure string building — no network. The resulting `upi://pay?…` URI is
//! opened by any UPI app on the customer's phone; the transaction note
//! carries the order id so a payment can be matched back by hand if the
//! provider flow is skipped.

use urlencoding::encode;

/// Build a `upi://pay` deep link. Amount is whole rupees, rendered with
/// the two decimals UPI apps expect; currency is always INR. Every
/// parameter value is URL-encoded.
pub fn deep_link(payee_vpa: &str, payee_name: &str, amount: u32, note: &str) -> String {
    format!(
        "upi://pay?pa={pa}&pn={pn}&am={am}&cu=INR&tn={tn}",
        pa = encode(payee_vpa),
        pn = encode(payee_name),
        am = encode(&format!("{amount}.00")),
        tn = encode(note),
    )
}
