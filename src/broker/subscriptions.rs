use std::collections::HashMap;

use crate::event::{topic_matches, CMD_QUIT};

/// Подписки по умолчанию для модуля `name`.
pub fn default_subscriptions(name: &str) -> Vec<String> {
    vec![CMD_QUIT.to_string(), name.to_string(), format!("{name}/#")]
}

/// Имя модуля → упорядоченный список шаблонов (дубликаты допустимы).
///
/// Изменяется только маршрутизатором в ответ на `$cmd/subs` и
/// `$cmd/unsubs`.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    table: HashMap<String, Vec<String>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Заводит запись модуля с подписками по умолчанию.
    pub fn register(
        &mut self,
        name: &str,
    ) {
        self.table
            .entry(name.to_string())
            .or_insert_with(|| default_subscriptions(name));
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.table.contains_key(name)
    }

    /// Добавляет шаблоны в конец списка. `false`, если модуль неизвестен.
    pub fn subscribe<I, S>(
        &mut self,
        name: &str,
        patterns: I,
    ) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.table.get_mut(name) {
            Some(list) => {
                list.extend(patterns.into_iter().map(Into::into));
                true
            }
            None => false,
        }
    }

    /// Убирает первое вхождение шаблона. `false`, если его не было.
    pub fn unsubscribe(
        &mut self,
        name: &str,
        pattern: &str,
    ) -> bool {
        let Some(list) = self.table.get_mut(name) else {
            return false;
        };
        match list.iter().position(|p| p == pattern) {
            Some(idx) => {
                list.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn patterns(
        &self,
        name: &str,
    ) -> Option<&[String]> {
        self.table.get(name).map(Vec::as_slice)
    }

    /// Первый подходящий шаблон модуля для домена.
    pub fn first_match<'a>(
        &'a self,
        name: &str,
        domain: &str,
    ) -> Option<&'a str> {
        self.table
            .get(name)?
            .iter()
            .find(|p| topic_matches(domain, p))
            .map(String::as_str)
    }

    /// Есть ли хоть один подписчик на домен.
    pub fn has_subscriber(
        &self,
        domain: &str,
    ) -> bool {
        self.table
            .values()
            .any(|list| list.iter().any(|p| topic_matches(domain, p)))
    }

    /// Модуль-источник события: имя совпадает с `from_id` или является его
    /// префиксом до `/`. При нескольких кандидатах побеждает самый длинный.
    pub fn resolve_origin<'a>(
        &'a self,
        from_id: &str,
    ) -> Option<&'a str> {
        self.table
            .keys()
            .filter(|name| {
                from_id == name.as_str()
                    || from_id
                        .strip_prefix(name.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|name| name.len())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
