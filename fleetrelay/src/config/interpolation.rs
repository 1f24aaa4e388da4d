use super::error::ConfigError;

/// Resolves `${VAR_NAME}` references from the environment.
///
/// A reference to an unset variable is an error. An unclosed `${` is kept
/// literally.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(close) = after.find('}') else {
            result.push_str(&rest[start..]);
            return Ok(result);
        };

        let name = &after[..close];
        if name.is_empty() {
            result.push_str("${}");
        } else {
            let value = std::env::var(name).map_err(|_| ConfigError::UndefinedVariable {
                name: name.to_string(),
            })?;
            result.push_str(&value);
        }
        rest = &after[close + 1..];
    }

    result.push_str(rest);
    Ok(result)
}
