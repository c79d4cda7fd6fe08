//! Extraction scripts the workers evaluate against a loaded page.
//!
//! A browser transport executes these verbatim; the bundled Reddit JSON
//! transport recognizes them by identity and answers from the listing API
//! instead.

/// Returns the candidate posts visible on the current listing page as an
/// array of `{title, content, author, link, createdUtc, upvotes,
/// numComments}` objects.
pub const EXTRACT_POSTS: &str = r"
(() => Array.from(document.querySelectorAll('shreddit-post')).map((el) => ({
  title: el.getAttribute('post-title'),
  content: (el.querySelector('[slot=text-body]')?.innerText ?? ''),
  author: el.getAttribute('author'),
  link: el.getAttribute('permalink'),
  createdUtc: Date.parse(el.getAttribute('created-timestamp')) / 1000,
  upvotes: Number(el.getAttribute('score') ?? 0),
  numComments: Number(el.getAttribute('comment-count') ?? 0),
})))()
";

/// Returns the comment texts on the current post page, top-level first.
pub const EXTRACT_COMMENTS: &str = r"
(() => Array.from(document.querySelectorAll('shreddit-comment [slot=comment]'))
  .map((el) => el.innerText.trim())
  .filter((text) => text.length > 0))()
";

/// Scrolls the listing to trigger the next batch; resolves `true` when more
/// content loaded.
pub const SCROLL_MORE: &str = r"
(() => {
  const before = document.querySelectorAll('shreddit-post').length;
  window.scrollTo(0, document.body.scrollHeight);
  return new Promise((resolve) => setTimeout(() => {
    resolve(document.querySelectorAll('shreddit-post').length > before);
  }, 1500));
})()
";
