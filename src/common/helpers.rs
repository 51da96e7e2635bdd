// Helper functions for safe logging

/// Masks an email address so only its first character and domain are logged
///
/// `"guest@example.com"` becomes `"g***@example.com"`.
pub fn safe_email_log(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        _ => "***@***.***".to_string(),
    }
}
