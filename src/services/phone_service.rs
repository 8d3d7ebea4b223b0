//! services/phone_service.rs
//! Normalización de teléfonos para comparar números escritos en formatos distintos
//! (con/sin código de país, con/sin el 9 de celular).

use std::collections::BTreeSet;

/// Código de país usado para generar variantes.
pub const COUNTRY_PREFIX: &str = "55";

/// Por encima de este largo el número se deja tal cual.
const MAX_DIGITS: usize = 14;

fn digits_only(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Número local (DDD + abonado) de 11 dígitos con el 9 de celular.
fn is_mobile_with_ninth(local: &str) -> bool {
    local.len() == 11 && local.as_bytes()[2] == b'9'
}

/// Número local de 10 dígitos cuyo abonado tiene forma de celular (empieza en 6-9).
fn is_mobile_without_ninth(local: &str) -> bool {
    local.len() == 10 && matches!(local.as_bytes()[2], b'6'..=b'9')
}

/// Separa los dígitos en (tenía_prefijo, parte_local).
fn split_prefix(digits: &str) -> (bool, &str) {
    if digits.starts_with(COUNTRY_PREFIX) && digits.len() >= 12 {
        (true, &digits[COUNTRY_PREFIX.len()..])
    } else {
        (false, digits)
    }
}

/// Todas las formas plausibles de un teléfono. Nunca falla:
/// entrada vacía -> conjunto vacío; más de 14 dígitos -> el número tal cual.
pub fn variants(phone: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let digits = digits_only(phone);
    if digits.is_empty() {
        return out;
    }
    if digits.len() > MAX_DIGITS {
        out.insert(digits);
        return out;
    }

    let (had_prefix, local) = split_prefix(&digits);
    let local = local.to_string();

    out.insert(digits.clone());
    if had_prefix {
        out.insert(local.clone());
    } else {
        out.insert(format!("{COUNTRY_PREFIX}{local}"));
    }

    if is_mobile_with_ninth(&local) {
        let without = format!("{}{}", &local[..2], &local[3..]);
        out.insert(format!("{COUNTRY_PREFIX}{without}"));
        out.insert(without);
    } else if is_mobile_without_ninth(&local) {
        let with = format!("{}9{}", &local[..2], &local[2..]);
        out.insert(format!("{COUNTRY_PREFIX}{with}"));
        out.insert(with);
    }

    out
}

/// Dos números representan la misma línea si comparten alguna variante.
pub fn matches(a: &str, b: &str) -> bool {
    let va = variants(a);
    if va.is_empty() {
        return false;
    }
    variants(b).iter().any(|v| va.contains(v))
}

/// Forma que se guarda en `sender_identities.phone_number`:
/// prefijo de país + número local con el 9 de celular cuando aplica.
pub fn canonical(phone: &str) -> Option<String> {
    let digits = digits_only(phone);
    if digits.is_empty() {
        return None;
    }
    if digits.len() > MAX_DIGITS {
        return Some(digits);
    }
    let (_, local) = split_prefix(&digits);
    if is_mobile_without_ninth(local) {
        Some(format!("{COUNTRY_PREFIX}{}9{}", &local[..2], &local[2..]))
    } else {
        Some(format!("{COUNTRY_PREFIX}{local}"))
    }
}
